//! KERNA - Kernel Execution Runtime for Native Accelerators
//!
//! A host-side compute dispatch runtime. It wraps the fixed host flow of an
//! OpenCL-style compute API (platform discovery, context and queue creation,
//! program build, buffer transfer, kernel launch, read-back, teardown) in
//! owned, checked Rust types.
//!
//! # Quick Start
//!
//! ```no_run
//! use kerna_rs::prelude::*;
//!
//! let config = Config::default();
//! let catalog = DeviceCatalog::host(&config)?;
//! let platform = catalog.platforms()[0].clone();
//! let devices = catalog.list_devices(&platform, DeviceFilter::Default)?;
//!
//! let context = Context::open(&catalog, &devices)?;
//! let queue = context.open_queue(&devices[0])?;
//! let cache = ProgramCache::new(&config);
//! let program = cache.build(&context, &load_source("kernels/saxpy.cl")?, &[])?;
//!
//! let n = 20;
//! let x = Buffer::allocate_for::<f32>(&context, n, AccessMode::ReadOnly)?;
//! let y = Buffer::allocate_for::<f32>(&context, n, AccessMode::ReadOnly)?;
//! let z = Buffer::allocate_for::<f32>(&context, n, AccessMode::WriteOnly)?;
//! queue.upload(&x, &vec![1.0f32; n], false)?;
//! queue.upload(&y, &vec![2.0f32; n], false)?;
//!
//! let mut saxpy = program.kernel("saxpy")?;
//! saxpy.set_arg(0, 3.0f32)?;
//! saxpy.set_arg(1, &x)?;
//! saxpy.set_arg(2, &y)?;
//! saxpy.set_arg(3, n as i32)?;
//! saxpy.set_arg(4, &z)?;
//! queue.dispatch(&saxpy, &WorkSize::one_d(n))?;
//!
//! let mut out = vec![0f32; n];
//! queue.download(&z, &mut out)?;
//! # Ok::<(), kerna_rs::Error>(())
//! ```
//!
//! # Components
//!
//! - **Device Catalog** ([`catalog`]): platforms, devices, limits, capabilities
//! - **Execution Context** ([`context`]): devices, queues and resource ownership
//! - **Program Cache** ([`program`]): builds, build logs, kernels
//! - **Transfer & Dispatch Engine** ([`dispatch`]): buffers, uploads, launches, downloads
//! - **Drivers** ([`driver`]): the built-in host platform, and OpenCL (feature `opencl`)
//! - **Telemetry** ([`telemetry`]): counters and latency histograms (feature `telemetry`)

#![warn(missing_debug_implementations)]

pub mod catalog;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod executor;
pub mod prelude;
pub mod program;
pub mod selection;
pub mod telemetry;

pub use catalog::{Capability, Device, DeviceCatalog, DeviceFilter, DeviceLimits, Platform};
pub use config::{Config, ConfigBuilder};
pub use context::{Context, Queue};
pub use dispatch::{AccessMode, Buffer, CompletionHandle, PendingRead, WorkSize};
pub use error::{BuildError, DeviceBuildLog, Error, Result};
pub use program::{load_source, Kernel, KernelArg, LocalMemory, Program, ProgramCache};
pub use selection::{select_device, DeviceSelector};
