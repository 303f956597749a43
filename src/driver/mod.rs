//! Backend seam between the runtime and a compute API implementation.
//!
//! The runtime layers (catalog, context, program cache, dispatch engine)
//! enforce ownership and argument invariants and talk to a [`Driver`] through
//! opaque handles. A driver only has to execute what it is asked to.
//!
//! Two drivers ship with the crate:
//! - [`HostDriver`]: a software platform whose devices execute work-groups on
//!   host threads. Always available.
//! - `OpenClDriver` (feature `opencl`): forwards to an installed OpenCL ICD.

pub mod event;
pub mod host;

#[cfg(feature = "opencl")]
pub mod opencl;

pub use event::Event;
pub use host::{HostDeviceSpec, HostDriver, HostDriverBuilder, HostPlatformSpec};

#[cfg(feature = "opencl")]
pub use opencl::OpenClDriver;

use crate::dispatch::{AccessMode, WorkSize};
use crate::error::Result;
use std::fmt;

/// Identity of a platform within one driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlatformId(pub u32);

/// Identity of a device within one driver, unique across its platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device#{}", self.0)
    }
}

macro_rules! handle_type {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u64);
        )*
    };
}

handle_type! {
    /// Driver-side context object.
    ContextHandle,
    /// Driver-side command queue.
    QueueHandle,
    /// Driver-side memory object.
    MemHandle,
    /// Driver-side built program.
    ProgramHandle,
    /// Driver-side kernel object.
    KernelHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Cpu,
    Gpu,
    Accelerator,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cpu => write!(f, "CPU"),
            DeviceKind::Gpu => write!(f, "GPU"),
            DeviceKind::Accelerator => write!(f, "Accelerator"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    pub id: PlatformId,
    pub name: String,
    pub vendor: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub platform: PlatformId,
    pub kind: DeviceKind,
    pub is_default: bool,
    pub name: String,
    pub vendor: String,
    pub global_mem_size: u64,
    pub local_mem_size: u64,
    pub max_mem_alloc_size: u64,
    pub max_work_group_size: usize,
    pub max_compute_units: u32,
    pub max_work_item_dimensions: u32,
    pub extensions: Vec<String>,
}

/// How a kernel parameter is passed, as declared in the kernel source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    GlobalBuffer,
    ConstantBuffer,
    LocalMemory,
    Scalar { size: usize },
}

impl ArgKind {
    pub fn is_buffer(&self) -> bool {
        matches!(self, ArgKind::GlobalBuffer | ArgKind::ConstantBuffer)
    }
}

impl fmt::Display for ArgKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgKind::GlobalBuffer => write!(f, "global buffer"),
            ArgKind::ConstantBuffer => write!(f, "constant buffer"),
            ArgKind::LocalMemory => write!(f, "local memory"),
            ArgKind::Scalar { size } => write!(f, "{}-byte scalar", size),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArgSignature {
    pub name: String,
    pub type_name: String,
    pub kind: ArgKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KernelSignature {
    pub name: String,
    pub args: Vec<ArgSignature>,
}

impl KernelSignature {
    pub fn arg_kinds(&self) -> Vec<ArgKind> {
        self.args.iter().map(|a| a.kind).collect()
    }
}

/// Per-device kernel limits, as reported after a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelWorkGroupInfo {
    pub local_mem_size: u64,
    pub private_mem_size: u64,
    pub preferred_work_group_size_multiple: usize,
    pub work_group_size: usize,
}

/// An argument value captured at enqueue time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawArg {
    Mem(MemHandle),
    Local(usize),
    Scalar(Vec<u8>),
}

/// The status-returning surface of a compute API.
///
/// Enqueue operations return an [`Event`] completed by the driver once the
/// command has executed; commands on one queue complete in submission order.
pub trait Driver: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn platforms(&self) -> Result<Vec<PlatformInfo>>;

    fn devices(&self, platform: PlatformId) -> Result<Vec<DeviceInfo>>;

    fn create_context(&self, devices: &[DeviceId]) -> Result<ContextHandle>;

    fn release_context(&self, context: ContextHandle);

    fn create_queue(&self, context: ContextHandle, device: DeviceId) -> Result<QueueHandle>;

    /// Drains outstanding commands, then releases the queue.
    fn release_queue(&self, queue: QueueHandle);

    fn create_buffer(
        &self,
        context: ContextHandle,
        size: usize,
        access: AccessMode,
    ) -> Result<MemHandle>;

    fn release_buffer(&self, mem: MemHandle);

    /// Builds `source` for `devices`. Failure is reported as
    /// [`Error::Build`](crate::Error::Build) carrying per-device logs.
    fn build_program(
        &self,
        context: ContextHandle,
        source: &str,
        devices: &[DeviceId],
    ) -> Result<ProgramHandle>;

    fn kernel_signatures(&self, program: ProgramHandle) -> Result<Vec<KernelSignature>>;

    fn release_program(&self, program: ProgramHandle);

    fn create_kernel(&self, program: ProgramHandle, name: &str) -> Result<KernelHandle>;

    fn kernel_work_group_info(
        &self,
        kernel: KernelHandle,
        device: DeviceId,
    ) -> Result<KernelWorkGroupInfo>;

    fn release_kernel(&self, kernel: KernelHandle);

    fn enqueue_write(
        &self,
        queue: QueueHandle,
        mem: MemHandle,
        offset: usize,
        data: Vec<u8>,
    ) -> Result<Event>;

    /// The returned event yields the bytes read.
    fn enqueue_read(
        &self,
        queue: QueueHandle,
        mem: MemHandle,
        offset: usize,
        len: usize,
    ) -> Result<Event>;

    fn enqueue_kernel(
        &self,
        queue: QueueHandle,
        kernel: KernelHandle,
        args: Vec<RawArg>,
        work: &WorkSize,
    ) -> Result<Event>;

    /// Blocks until every command submitted to `queue` has completed.
    fn finish(&self, queue: QueueHandle) -> Result<()>;
}
