//! Software compute platform executing kernels on host threads.
//!
//! Every host device owns a pool of compute-unit workers (created on first
//! use) and every queue owns a submission thread. Programs are "built" by
//! binding the source's `__kernel` entry points to registered
//! [`NativeKernel`]s; see [`compiler`] for what a build checks.

pub(crate) mod compiler;
pub mod library;
pub(crate) mod memory;
pub(crate) mod queue;

pub use library::{
    GlobalView, KernelArgs, KernelFault, NativeKernel, NativeLibrary, WorkGroup, WorkItem,
};
pub use memory::Element;

use self::library::ArgValue;
use self::memory::DeviceMemory;
use self::queue::{Command, GroupPlan, HostQueue, Launch};
use super::{
    ContextHandle, DeviceId, DeviceInfo, DeviceKind, Driver, Event, KernelHandle, KernelSignature,
    KernelWorkGroupInfo, MemHandle, PlatformId, PlatformInfo, ProgramHandle, QueueHandle, RawArg,
};
use crate::config::Config;
use crate::dispatch::{AccessMode, WorkSize};
use crate::error::{BuildError, DeviceBuildLog, Error, Result};
use crate::executor::{CpuPool, PoolStats};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const MIB: u64 = 1024 * 1024;

/// Description of one host device.
#[derive(Debug, Clone)]
pub struct HostDeviceSpec {
    pub name: String,
    pub kind: DeviceKind,
    pub is_default: bool,
    pub compute_units: usize,
    pub global_mem_size: u64,
    pub local_mem_size: u64,
    pub max_mem_alloc_size: u64,
    pub max_work_group_size: usize,
    pub preferred_work_group_size_multiple: usize,
    pub extensions: Vec<String>,
}

impl HostDeviceSpec {
    pub fn new<S: Into<String>>(name: S, kind: DeviceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            is_default: false,
            compute_units: 1,
            global_mem_size: 64 * MIB,
            local_mem_size: 32 * 1024,
            max_mem_alloc_size: 16 * MIB,
            max_work_group_size: 256,
            preferred_work_group_size_multiple: 1,
            extensions: Vec::new(),
        }
    }

    /// The host CPU, backed by `config.worker_threads()` compute units.
    pub fn cpu(config: &Config) -> Self {
        Self {
            is_default: true,
            compute_units: config.worker_threads(),
            global_mem_size: config.host_global_mem_size,
            local_mem_size: config.host_local_mem_size,
            max_mem_alloc_size: config.host_global_mem_size / 4,
            max_work_group_size: 1024,
            preferred_work_group_size_multiple: 8,
            extensions: vec![
                "cl_khr_fp64".to_string(),
                "cl_khr_byte_addressable_store".to_string(),
                "cl_khr_global_int32_base_atomics".to_string(),
            ],
            ..Self::new("KERNA Host CPU", DeviceKind::Cpu)
        }
    }

    /// A small GPU-shaped device without double precision.
    pub fn simulated_gpu() -> Self {
        Self {
            compute_units: 4,
            global_mem_size: 256 * MIB,
            local_mem_size: 48 * 1024,
            max_mem_alloc_size: 64 * MIB,
            max_work_group_size: 256,
            preferred_work_group_size_multiple: 32,
            extensions: vec![
                "cl_khr_byte_addressable_store".to_string(),
                "cl_khr_global_int32_base_atomics".to_string(),
            ],
            ..Self::new("KERNA Simulated GPU", DeviceKind::Gpu)
        }
    }

    pub fn with_extension<S: Into<String>>(mut self, extension: S) -> Self {
        self.extensions.push(extension.into());
        self
    }
}

/// Description of one host platform and its devices.
#[derive(Debug, Clone)]
pub struct HostPlatformSpec {
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub devices: Vec<HostDeviceSpec>,
}

impl HostPlatformSpec {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            vendor: "KERNA".to_string(),
            version: "OpenCL 1.2 KERNA host".to_string(),
            devices: Vec::new(),
        }
    }

    pub fn device(mut self, device: HostDeviceSpec) -> Self {
        self.devices.push(device);
        self
    }

    /// One CPU device and one simulated GPU.
    pub fn default_host(config: &Config) -> Self {
        Self::new("KERNA Host Platform")
            .device(HostDeviceSpec::cpu(config))
            .device(HostDeviceSpec::simulated_gpu())
    }
}

#[derive(Debug)]
pub struct HostDriverBuilder {
    config: Config,
    platforms: Vec<HostPlatformSpec>,
    library: NativeLibrary,
}

impl HostDriverBuilder {
    pub fn config(mut self, config: &Config) -> Self {
        self.config = config.clone();
        self
    }

    pub fn platform(mut self, platform: HostPlatformSpec) -> Self {
        self.platforms.push(platform);
        self
    }

    /// Makes `kernel` available to programs built by the driver.
    pub fn register(mut self, kernel: Arc<dyn NativeKernel>) -> Self {
        self.library.register(kernel);
        self
    }

    pub fn library(mut self, library: NativeLibrary) -> Self {
        self.library = library;
        self
    }

    pub fn build(self) -> HostDriver {
        let mut platforms = Vec::with_capacity(self.platforms.len());
        let mut devices = Vec::new();

        for (p, spec) in self.platforms.into_iter().enumerate() {
            let platform = PlatformId(p as u32);
            platforms.push(PlatformInfo {
                id: platform,
                name: spec.name,
                vendor: spec.vendor.clone(),
                version: spec.version,
            });

            for device in spec.devices {
                let id = DeviceId(devices.len() as u32);
                devices.push(HostDevice {
                    info: DeviceInfo {
                        id,
                        platform,
                        kind: device.kind,
                        is_default: device.is_default,
                        name: device.name,
                        vendor: spec.vendor.clone(),
                        global_mem_size: device.global_mem_size,
                        local_mem_size: device.local_mem_size,
                        max_mem_alloc_size: device.max_mem_alloc_size,
                        max_work_group_size: device.max_work_group_size,
                        max_compute_units: device.compute_units as u32,
                        max_work_item_dimensions: 3,
                        extensions: device.extensions,
                    },
                    compute_units: device.compute_units.max(1),
                    preferred_multiple: device.preferred_work_group_size_multiple.max(1),
                    pool: Mutex::new(None),
                });
            }
        }

        HostDriver {
            config: self.config,
            platforms,
            devices,
            library: self.library,
            next_handle: AtomicU64::new(1),
            state: Mutex::new(State::default()),
        }
    }
}

struct HostDevice {
    info: DeviceInfo,
    compute_units: usize,
    preferred_multiple: usize,
    pool: Mutex<Option<Arc<CpuPool>>>,
}

struct ContextRecord {
    devices: Vec<DeviceId>,
}

struct QueueRecord {
    context: ContextHandle,
    device: DeviceId,
    pool: Arc<CpuPool>,
    queue: HostQueue,
}

struct BufferRecord {
    context: ContextHandle,
    mem: Arc<DeviceMemory>,
}

struct ProgramRecord {
    context: ContextHandle,
    devices: Vec<DeviceId>,
    kernels: Vec<KernelSignature>,
}

struct KernelRecord {
    program: ProgramHandle,
    signature: KernelSignature,
    native: Arc<dyn NativeKernel>,
}

#[derive(Default)]
struct State {
    contexts: HashMap<ContextHandle, ContextRecord>,
    queues: HashMap<QueueHandle, QueueRecord>,
    buffers: HashMap<MemHandle, BufferRecord>,
    programs: HashMap<ProgramHandle, ProgramRecord>,
    kernels: HashMap<KernelHandle, KernelRecord>,
}

/// The software platform. Cheap to share behind an `Arc<dyn Driver>`.
pub struct HostDriver {
    config: Config,
    platforms: Vec<PlatformInfo>,
    devices: Vec<HostDevice>,
    library: NativeLibrary,
    next_handle: AtomicU64,
    state: Mutex<State>,
}

impl HostDriver {
    /// The default topology: [`HostPlatformSpec::default_host`] with the
    /// built-in kernel library.
    pub fn new(config: &Config) -> Self {
        Self::builder()
            .config(config)
            .platform(HostPlatformSpec::default_host(config))
            .build()
    }

    /// An empty driver with the built-in kernel library.
    pub fn builder() -> HostDriverBuilder {
        HostDriverBuilder {
            config: Config::default(),
            platforms: Vec::new(),
            library: NativeLibrary::builtin(),
        }
    }

    pub fn library(&self) -> &NativeLibrary {
        &self.library
    }

    /// Work-group counters of a device's compute units, once it has any.
    pub fn pool_stats(&self, device: DeviceId) -> Option<PoolStats> {
        let device = self.devices.get(device.0 as usize)?;
        let pool = device.pool.lock();
        pool.as_ref().map(|p| p.stats())
    }

    fn next_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn device(&self, id: DeviceId) -> Result<&HostDevice> {
        self.devices.get(id.0 as usize).ok_or(Error::Driver {
            call: "device lookup",
            status: -33,
        })
    }

    fn pool_for(&self, device: &HostDevice) -> Result<Arc<CpuPool>> {
        let mut slot = device.pool.lock();
        if let Some(pool) = slot.as_ref() {
            return Ok(pool.clone());
        }
        let label = format!("dev{}", device.info.id.0);
        let pool = Arc::new(CpuPool::new(&label, device.compute_units, &self.config)?);
        *slot = Some(pool.clone());
        Ok(pool)
    }
}

fn stale(resource: &'static str) -> Error {
    Error::UseAfterClose { resource }
}

impl Driver for HostDriver {
    fn name(&self) -> &str {
        "host"
    }

    fn platforms(&self) -> Result<Vec<PlatformInfo>> {
        Ok(self.platforms.clone())
    }

    fn devices(&self, platform: PlatformId) -> Result<Vec<DeviceInfo>> {
        Ok(self
            .devices
            .iter()
            .filter(|d| d.info.platform == platform)
            .map(|d| d.info.clone())
            .collect())
    }

    fn create_context(&self, devices: &[DeviceId]) -> Result<ContextHandle> {
        let Some(first) = devices.first() else {
            return Err(Error::context_creation("no devices given"));
        };
        let platform = self.device(*first)?.info.platform;
        for id in devices {
            if self.device(*id)?.info.platform != platform {
                return Err(Error::context_creation(
                    "devices belong to different platforms",
                ));
            }
        }

        let handle = ContextHandle(self.next_handle());
        self.state.lock().contexts.insert(
            handle,
            ContextRecord {
                devices: devices.to_vec(),
            },
        );
        Ok(handle)
    }

    fn release_context(&self, context: ContextHandle) {
        let queues: Vec<QueueRecord> = {
            let mut state = self.state.lock();
            state.contexts.remove(&context);
            state.buffers.retain(|_, b| b.context != context);
            let programs: Vec<ProgramHandle> = state
                .programs
                .iter()
                .filter(|(_, p)| p.context == context)
                .map(|(h, _)| *h)
                .collect();
            state.programs.retain(|_, p| p.context != context);
            state.kernels.retain(|_, k| !programs.contains(&k.program));

            let handles: Vec<QueueHandle> = state
                .queues
                .iter()
                .filter(|(_, q)| q.context == context)
                .map(|(h, _)| *h)
                .collect();
            handles
                .iter()
                .filter_map(|h| state.queues.remove(h))
                .collect()
        };
        // queue threads drain and join outside the lock
        drop(queues);
    }

    fn create_queue(&self, context: ContextHandle, device: DeviceId) -> Result<QueueHandle> {
        {
            let state = self.state.lock();
            let record = state.contexts.get(&context).ok_or(stale("context"))?;
            if !record.devices.contains(&device) {
                return Err(Error::DeviceNotInContext { device });
            }
        }

        let pool = self.pool_for(self.device(device)?)?;
        let handle = QueueHandle(self.next_handle());
        let name = format!("{}-queue-{}", self.config.thread_name_prefix, handle.0);
        let queue = HostQueue::spawn(name)?;

        self.state.lock().queues.insert(
            handle,
            QueueRecord {
                context,
                device,
                pool,
                queue,
            },
        );
        Ok(handle)
    }

    fn release_queue(&self, queue: QueueHandle) {
        let record = self.state.lock().queues.remove(&queue);
        drop(record);
    }

    fn create_buffer(
        &self,
        context: ContextHandle,
        size: usize,
        access: AccessMode,
    ) -> Result<MemHandle> {
        let mut state = self.state.lock();
        let record = state.contexts.get(&context).ok_or(stale("context"))?;

        let mut limit = u64::MAX;
        for id in &record.devices {
            limit = limit.min(self.device(*id)?.info.max_mem_alloc_size);
        }
        if size == 0 || size as u64 > limit {
            return Err(Error::Allocation {
                requested: size as u64,
                available: limit,
            });
        }

        let handle = MemHandle(self.next_handle());
        state.buffers.insert(
            handle,
            BufferRecord {
                context,
                mem: Arc::new(DeviceMemory::new(size, access)),
            },
        );
        Ok(handle)
    }

    fn release_buffer(&self, mem: MemHandle) {
        self.state.lock().buffers.remove(&mem);
    }

    fn build_program(
        &self,
        context: ContextHandle,
        source: &str,
        devices: &[DeviceId],
    ) -> Result<ProgramHandle> {
        {
            let state = self.state.lock();
            let record = state.contexts.get(&context).ok_or(stale("context"))?;
            if let Some(device) = devices.iter().find(|d| !record.devices.contains(d)) {
                return Err(Error::DeviceNotInContext { device: *device });
            }
        }

        let mut logs = Vec::with_capacity(devices.len());
        let mut kernels = None;
        for id in devices {
            let device = self.device(*id)?;
            let outcome = compiler::compile(source, &device.info, &self.library);
            let (succeeded, log) = match outcome {
                Ok(signatures) => {
                    kernels.get_or_insert(signatures);
                    (true, String::new())
                }
                Err(log) => (false, log),
            };
            logs.push(DeviceBuildLog {
                device: *id,
                device_name: device.info.name.clone(),
                succeeded,
                log,
            });
        }

        if logs.iter().any(|l| !l.succeeded) {
            return Err(BuildError::new(logs).into());
        }

        let handle = ProgramHandle(self.next_handle());
        self.state.lock().programs.insert(
            handle,
            ProgramRecord {
                context,
                devices: devices.to_vec(),
                kernels: kernels.unwrap_or_default(),
            },
        );
        Ok(handle)
    }

    fn kernel_signatures(&self, program: ProgramHandle) -> Result<Vec<KernelSignature>> {
        let state = self.state.lock();
        let record = state.programs.get(&program).ok_or(stale("program"))?;
        Ok(record.kernels.clone())
    }

    fn release_program(&self, program: ProgramHandle) {
        let mut state = self.state.lock();
        state.programs.remove(&program);
        state.kernels.retain(|_, k| k.program != program);
    }

    fn create_kernel(&self, program: ProgramHandle, name: &str) -> Result<KernelHandle> {
        let mut state = self.state.lock();
        let record = state.programs.get(&program).ok_or(stale("program"))?;
        let not_found = || Error::KernelNotFound {
            name: name.to_string(),
        };

        let signature = record
            .kernels
            .iter()
            .find(|k| k.name == name)
            .cloned()
            .ok_or_else(not_found)?;
        let native = self.library.get(name).cloned().ok_or_else(not_found)?;

        let handle = KernelHandle(self.next_handle());
        state.kernels.insert(
            handle,
            KernelRecord {
                program,
                signature,
                native,
            },
        );
        Ok(handle)
    }

    fn kernel_work_group_info(
        &self,
        kernel: KernelHandle,
        device: DeviceId,
    ) -> Result<KernelWorkGroupInfo> {
        let state = self.state.lock();
        let record = state.kernels.get(&kernel).ok_or(stale("kernel"))?;
        let program = state
            .programs
            .get(&record.program)
            .ok_or(stale("program"))?;
        if !program.devices.contains(&device) {
            return Err(Error::DeviceNotInContext { device });
        }

        let host = self.device(device)?;
        let private_mem_size = record
            .signature
            .args
            .iter()
            .map(|a| match a.kind {
                super::ArgKind::Scalar { size } => size as u64,
                _ => std::mem::size_of::<u64>() as u64,
            })
            .sum();

        Ok(KernelWorkGroupInfo {
            local_mem_size: 0,
            private_mem_size,
            preferred_work_group_size_multiple: host.preferred_multiple,
            work_group_size: host.info.max_work_group_size,
        })
    }

    fn release_kernel(&self, kernel: KernelHandle) {
        self.state.lock().kernels.remove(&kernel);
    }

    fn enqueue_write(
        &self,
        queue: QueueHandle,
        mem: MemHandle,
        offset: usize,
        data: Vec<u8>,
    ) -> Result<Event> {
        let state = self.state.lock();
        let record = state.queues.get(&queue).ok_or(stale("queue"))?;
        let buffer = state.buffers.get(&mem).ok_or(stale("buffer"))?;
        if buffer.context != record.context {
            return Err(Error::ContextMismatch { resource: "buffer" });
        }

        record.queue.submit(Command::Write {
            mem: buffer.mem.clone(),
            offset,
            data,
            event: Event::pending(),
        })
    }

    fn enqueue_read(
        &self,
        queue: QueueHandle,
        mem: MemHandle,
        offset: usize,
        len: usize,
    ) -> Result<Event> {
        let state = self.state.lock();
        let record = state.queues.get(&queue).ok_or(stale("queue"))?;
        let buffer = state.buffers.get(&mem).ok_or(stale("buffer"))?;
        if buffer.context != record.context {
            return Err(Error::ContextMismatch { resource: "buffer" });
        }

        record.queue.submit(Command::Read {
            mem: buffer.mem.clone(),
            offset,
            len,
            event: Event::pending(),
        })
    }

    fn enqueue_kernel(
        &self,
        queue: QueueHandle,
        kernel: KernelHandle,
        args: Vec<RawArg>,
        work: &WorkSize,
    ) -> Result<Event> {
        let state = self.state.lock();
        let record = state.queues.get(&queue).ok_or(stale("queue"))?;
        let kernel = state.kernels.get(&kernel).ok_or(stale("kernel"))?;
        let device = &self.device(record.device)?.info;

        work.validate(device.max_work_group_size)?;

        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            let value = match arg {
                RawArg::Mem(handle) => {
                    let buffer = state.buffers.get(&handle).ok_or(stale("buffer"))?;
                    if buffer.context != record.context {
                        return Err(Error::ContextMismatch { resource: "buffer" });
                    }
                    ArgValue::Mem(buffer.mem.clone())
                }
                RawArg::Local(len) => {
                    if len as u64 > device.local_mem_size {
                        return Err(Error::Allocation {
                            requested: len as u64,
                            available: device.local_mem_size,
                        });
                    }
                    ArgValue::Local(len)
                }
                RawArg::Scalar(bytes) => ArgValue::Scalar(bytes),
            };
            values.push(value);
        }

        let launch = Launch {
            name: kernel.signature.name.clone(),
            kernel: kernel.native.clone(),
            args: KernelArgs::new(values),
            plan: GroupPlan::new(work, device.max_work_group_size),
            pool: record.pool.clone(),
        };

        record.queue.submit(Command::Launch {
            launch,
            event: Event::pending(),
        })
    }

    fn finish(&self, queue: QueueHandle) -> Result<()> {
        let marker = {
            let state = self.state.lock();
            let record = state.queues.get(&queue).ok_or(stale("queue"))?;
            record.queue.submit(Command::Marker {
                event: Event::pending(),
            })?
        };
        marker.wait().map(|_| ())
    }
}

impl std::fmt::Debug for HostDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostDriver")
            .field("platforms", &self.platforms.len())
            .field("devices", &self.devices.len())
            .field("kernels", &self.library.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRIG: &str = "__kernel void trigTable(__global const float* A,\n\
                        __global const float* B, __global float* C) { }";

    fn driver() -> HostDriver {
        let config = Config::builder().compute_units(2).build().unwrap();
        HostDriver::new(&config)
    }

    #[test]
    fn test_default_topology() {
        let driver = driver();
        let platforms = driver.platforms().unwrap();
        assert_eq!(platforms.len(), 1);
        assert_eq!(platforms[0].version, "OpenCL 1.2 KERNA host");

        let devices = driver.devices(platforms[0].id).unwrap();
        assert_eq!(devices.len(), 2);
        assert!(devices[0].is_default);
        assert_eq!(devices[0].kind, DeviceKind::Cpu);
        assert_eq!(devices[0].max_compute_units, 2);
        assert_eq!(devices[1].kind, DeviceKind::Gpu);
        assert!(!devices[1].extensions.iter().any(|e| e == "cl_khr_fp64"));
    }

    #[test]
    fn test_write_launch_read() {
        let driver = driver();
        let ctx = driver.create_context(&[DeviceId(0)]).unwrap();
        let queue = driver.create_queue(ctx, DeviceId(0)).unwrap();

        let n = 256;
        let a = driver.create_buffer(ctx, n * 4, AccessMode::ReadOnly).unwrap();
        let b = driver.create_buffer(ctx, n * 4, AccessMode::ReadOnly).unwrap();
        let c = driver.create_buffer(ctx, n * 8, AccessMode::WriteOnly).unwrap();

        let zeros: Vec<u8> = vec![0; n * 4];
        driver.enqueue_write(queue, a, 0, zeros.clone()).unwrap();
        driver.enqueue_write(queue, b, 0, zeros).unwrap();

        let program = driver.build_program(ctx, TRIG, &[DeviceId(0)]).unwrap();
        let kernel = driver.create_kernel(program, "trigTable").unwrap();
        let args = vec![RawArg::Mem(a), RawArg::Mem(b), RawArg::Mem(c)];
        let launch = driver
            .enqueue_kernel(queue, kernel, args, &WorkSize::one_d(n))
            .unwrap();
        launch.wait().unwrap();

        let bytes = driver.enqueue_read(queue, c, 0, 8).unwrap().wait().unwrap();
        let cos0 = f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let sin0 = f32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        assert_eq!((cos0, sin0), (1.0, 0.0));

        assert_eq!(driver.pool_stats(DeviceId(0)).map(|s| s.panics), Some(0));
        driver.release_context(ctx);
    }

    #[test]
    fn test_build_failure_has_log_per_device() {
        let driver = driver();
        let ctx = driver.create_context(&[DeviceId(0), DeviceId(1)]).unwrap();
        let source = "__kernel void matrixMultiply(__global const double* A,\n\
                      __global const double* B, __global double* C, int N) { }";

        let err = driver
            .build_program(ctx, source, &[DeviceId(0), DeviceId(1)])
            .unwrap_err();
        let build = err.build_log().unwrap();
        assert_eq!(build.logs.len(), 2);
        assert!(build.logs[0].succeeded);
        assert!(!build.logs[1].succeeded);
        assert!(build.log_for(DeviceId(1)).unwrap().contains("cl_khr_fp64"));
    }

    #[test]
    fn test_queue_requires_context_device() {
        let driver = driver();
        let ctx = driver.create_context(&[DeviceId(0)]).unwrap();
        let err = driver.create_queue(ctx, DeviceId(1)).unwrap_err();
        assert!(matches!(err, Error::DeviceNotInContext { device } if device == DeviceId(1)));
    }

    #[test]
    fn test_cross_platform_context_is_rejected() {
        let driver = HostDriver::builder()
            .platform(HostPlatformSpec::new("a").device(HostDeviceSpec::new("a0", DeviceKind::Cpu)))
            .platform(HostPlatformSpec::new("b").device(HostDeviceSpec::new("b0", DeviceKind::Gpu)))
            .build();
        let err = driver
            .create_context(&[DeviceId(0), DeviceId(1)])
            .unwrap_err();
        assert!(matches!(err, Error::ContextCreation(_)));
    }

    #[test]
    fn test_released_context_invalidates_children() {
        let driver = driver();
        let ctx = driver.create_context(&[DeviceId(0)]).unwrap();
        let queue = driver.create_queue(ctx, DeviceId(0)).unwrap();
        let mem = driver.create_buffer(ctx, 16, AccessMode::ReadWrite).unwrap();

        driver.release_context(ctx);

        assert!(matches!(
            driver.enqueue_read(queue, mem, 0, 16),
            Err(Error::UseAfterClose { .. })
        ));
        assert!(driver.create_buffer(ctx, 16, AccessMode::ReadWrite).is_err());
    }
}
