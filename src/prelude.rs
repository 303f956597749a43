pub use crate::catalog::{Capability, Device, DeviceCatalog, DeviceFilter, DeviceLimits, Platform};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::context::{Context, Queue};
pub use crate::dispatch::{AccessMode, Buffer, CompletionHandle, PendingRead, WorkSize};
pub use crate::error::{Error, Result};
pub use crate::program::{load_source, Kernel, LocalMemory, Program, ProgramCache};
pub use crate::selection::DeviceSelector;

pub use crate::telemetry::{Metrics, MetricsSnapshot};
