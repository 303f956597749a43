//! Work-group execution infrastructure for host devices.
//!
//! Each host device owns a [`CpuPool`] whose worker threads play the role of
//! compute units: a dispatch's work-groups are cut into contiguous batches,
//! the batches are pushed onto a global injector, and idle workers steal
//! from each other until the range is drained.

pub mod cpu_pool;
pub mod panic_handler;
pub mod task;
pub mod worker;

pub use cpu_pool::{CpuPool, PoolStats};
pub use panic_handler::{PanicHandler, PanicInfo};

