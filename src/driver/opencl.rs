//! Driver backed by an installed OpenCL ICD.
//!
//! Every enqueue is issued as a blocking call, so the returned events are
//! already complete. Kernel signatures come from the kernel argument info
//! queries, which is why programs are built with `-cl-kernel-arg-info`.

use super::host::compiler::scalar_size;
use super::{
    ArgKind, ArgSignature, ContextHandle, DeviceId, DeviceInfo, DeviceKind, Driver, Event,
    KernelHandle, KernelSignature, KernelWorkGroupInfo, MemHandle, PlatformId, PlatformInfo,
    ProgramHandle, QueueHandle, RawArg,
};
use crate::dispatch::{AccessMode, WorkSize};
use crate::error::{BuildError, DeviceBuildLog, Error, Result};
use opencl3::command_queue::CommandQueue;
use opencl3::context::Context;
use opencl3::device::{
    cl_device_id, Device, CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU,
    CL_DEVICE_TYPE_DEFAULT, CL_DEVICE_TYPE_GPU,
};
use opencl3::error_codes::ClError;
use opencl3::kernel::{
    Kernel, CL_KERNEL_ARG_ADDRESS_CONSTANT, CL_KERNEL_ARG_ADDRESS_GLOBAL,
    CL_KERNEL_ARG_ADDRESS_LOCAL,
};
use opencl3::memory::{Buffer, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE, CL_MEM_WRITE_ONLY};
use opencl3::platform::get_platforms;
use opencl3::program::Program;
use opencl3::types::{cl_mem, CL_BLOCKING};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::c_void;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const BUILD_OPTIONS: &str = "-cl-kernel-arg-info";

fn cl(call: &'static str) -> impl Fn(ClError) -> Error {
    move |err| Error::Driver {
        call,
        status: err.0,
    }
}

fn stale(resource: &'static str) -> Error {
    Error::UseAfterClose { resource }
}

struct ClDevice {
    info: DeviceInfo,
    // raw cl_device_id, kept as an integer so the driver stays Send + Sync
    raw: usize,
}

impl ClDevice {
    fn id(&self) -> cl_device_id {
        self.raw as cl_device_id
    }
}

struct ClProgram {
    context: ContextHandle,
    program: Program,
    devices: Vec<DeviceId>,
    kernels: Vec<KernelSignature>,
}

#[derive(Default)]
struct ClState {
    contexts: HashMap<ContextHandle, (Context, Vec<DeviceId>)>,
    queues: HashMap<QueueHandle, (ContextHandle, Arc<CommandQueue>)>,
    buffers: HashMap<MemHandle, (ContextHandle, Buffer<u8>)>,
    programs: HashMap<ProgramHandle, ClProgram>,
    kernels: HashMap<KernelHandle, (ProgramHandle, Kernel)>,
}

pub struct OpenClDriver {
    platforms: Vec<PlatformInfo>,
    devices: Vec<ClDevice>,
    next_handle: AtomicU64,
    state: Mutex<ClState>,
}

impl OpenClDriver {
    /// Snapshots every platform and device the ICD loader reports.
    pub fn new() -> Result<Self> {
        let mut platforms = Vec::new();
        let mut devices = Vec::new();

        for (p, platform) in get_platforms().map_err(cl("clGetPlatformIDs"))?.iter().enumerate() {
            let id = PlatformId(p as u32);
            platforms.push(PlatformInfo {
                id,
                name: platform.name().map_err(cl("clGetPlatformInfo"))?,
                vendor: platform.vendor().map_err(cl("clGetPlatformInfo"))?,
                version: platform.version().map_err(cl("clGetPlatformInfo"))?,
            });

            let defaults = platform
                .get_devices(CL_DEVICE_TYPE_DEFAULT)
                .unwrap_or_default();
            let raw_devices = platform
                .get_devices(CL_DEVICE_TYPE_ALL)
                .map_err(cl("clGetDeviceIDs"))?;

            for raw in raw_devices {
                let device = Device::new(raw);
                let dev_type = device.dev_type().map_err(cl("clGetDeviceInfo"))?;
                let kind = if dev_type & CL_DEVICE_TYPE_GPU != 0 {
                    DeviceKind::Gpu
                } else if dev_type & CL_DEVICE_TYPE_CPU != 0 {
                    DeviceKind::Cpu
                } else if dev_type & CL_DEVICE_TYPE_ACCELERATOR != 0 {
                    DeviceKind::Accelerator
                } else {
                    DeviceKind::Accelerator
                };

                let info = DeviceInfo {
                    id: DeviceId(devices.len() as u32),
                    platform: id,
                    kind,
                    is_default: defaults.contains(&raw),
                    name: device.name().map_err(cl("clGetDeviceInfo"))?,
                    vendor: device.vendor().map_err(cl("clGetDeviceInfo"))?,
                    global_mem_size: device.global_mem_size().map_err(cl("clGetDeviceInfo"))?,
                    local_mem_size: device.local_mem_size().map_err(cl("clGetDeviceInfo"))?,
                    max_mem_alloc_size: device
                        .max_mem_alloc_size()
                        .map_err(cl("clGetDeviceInfo"))?,
                    max_work_group_size: device
                        .max_work_group_size()
                        .map_err(cl("clGetDeviceInfo"))?,
                    max_compute_units: device.max_compute_units().map_err(cl("clGetDeviceInfo"))?,
                    max_work_item_dimensions: device
                        .max_work_item_dimensions()
                        .map_err(cl("clGetDeviceInfo"))?,
                    extensions: device
                        .extensions()
                        .map_err(cl("clGetDeviceInfo"))?
                        .split_whitespace()
                        .map(str::to_string)
                        .collect(),
                };
                devices.push(ClDevice {
                    info,
                    raw: raw as usize,
                });
            }
        }

        tracing::debug!(
            "OpenCL driver found {} platform(s), {} device(s)",
            platforms.len(),
            devices.len()
        );

        Ok(Self {
            platforms,
            devices,
            next_handle: AtomicU64::new(1),
            state: Mutex::new(ClState::default()),
        })
    }

    fn next_handle(&self) -> u64 {
        self.next_handle.fetch_add(1, Ordering::Relaxed)
    }

    fn device(&self, id: DeviceId) -> Result<&ClDevice> {
        self.devices.get(id.0 as usize).ok_or(Error::Driver {
            call: "device lookup",
            status: -33,
        })
    }

    fn signatures(kernel_names: &str, program: &Program) -> Result<Vec<KernelSignature>> {
        let mut signatures = Vec::new();
        for name in kernel_names.split(';').filter(|n| !n.is_empty()) {
            let kernel = Kernel::create(program, name).map_err(cl("clCreateKernel"))?;
            let count = kernel.num_args().map_err(cl("clGetKernelInfo"))?;
            let mut args = Vec::with_capacity(count as usize);

            for index in 0..count {
                let qualifier = kernel
                    .get_arg_address_qualifier(index)
                    .map_err(cl("clGetKernelArgInfo"))?;
                let type_name = kernel
                    .get_arg_type_name(index)
                    .map_err(cl("clGetKernelArgInfo"))?;
                let arg_name = kernel
                    .get_arg_name(index)
                    .map_err(cl("clGetKernelArgInfo"))?;

                let kind = match qualifier {
                    CL_KERNEL_ARG_ADDRESS_GLOBAL => ArgKind::GlobalBuffer,
                    CL_KERNEL_ARG_ADDRESS_CONSTANT => ArgKind::ConstantBuffer,
                    CL_KERNEL_ARG_ADDRESS_LOCAL => ArgKind::LocalMemory,
                    _ => ArgKind::Scalar {
                        size: scalar_size(type_name.trim()).unwrap_or(0),
                    },
                };
                args.push(ArgSignature {
                    name: arg_name,
                    type_name,
                    kind,
                });
            }

            signatures.push(KernelSignature {
                name: name.to_string(),
                args,
            });
        }
        Ok(signatures)
    }
}

impl Driver for OpenClDriver {
    fn name(&self) -> &str {
        "opencl"
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
        if devices.is_empty() {
            return Err(Error::context_creation("no devices given"));
        }
        let raw: Vec<cl_device_id> = devices
            .iter()
            .map(|d| self.device(*d).map(ClDevice::id))
            .collect::<Result<_>>()?;

        let context = Context::from_devices(&raw, &[], None, std::ptr::null_mut())
            .map_err(|e| Error::context_creation(format!("clCreateContext: {}", e)))?;

        let handle = ContextHandle(self.next_handle());
        self.state
            .lock()
            .contexts
            .insert(handle, (context, devices.to_vec()));
        Ok(handle)
    }

    fn release_context(&self, context: ContextHandle) {
        let mut state = self.state.lock();
        let programs: Vec<ProgramHandle> = state
            .programs
            .iter()
            .filter(|(_, p)| p.context == context)
            .map(|(h, _)| *h)
            .collect();
        state.kernels.retain(|_, (p, _)| !programs.contains(p));
        state.programs.retain(|_, p| p.context != context);
        state.buffers.retain(|_, (c, _)| *c != context);
        state.queues.retain(|_, (c, _)| *c != context);
        state.contexts.remove(&context);
    }

    fn create_queue(&self, context: ContextHandle, device: DeviceId) -> Result<QueueHandle> {
        let mut state = self.state.lock();
        let (ctx, members) = state.contexts.get(&context).ok_or(stale("context"))?;
        if !members.contains(&device) {
            return Err(Error::DeviceNotInContext { device });
        }

        let queue = CommandQueue::create_with_properties(ctx, self.device(device)?.id(), 0, 0)
            .map_err(cl("clCreateCommandQueueWithProperties"))?;

        let handle = QueueHandle(self.next_handle());
        state.queues.insert(handle, (context, Arc::new(queue)));
        Ok(handle)
    }

    fn release_queue(&self, queue: QueueHandle) {
        let removed = self.state.lock().queues.remove(&queue);
        if let Some((_, queue)) = removed {
            if let Err(err) = queue.finish() {
                tracing::warn!("clFinish on release returned {}", err.0);
            }
        }
    }

    fn create_buffer(
        &self,
        context: ContextHandle,
        size: usize,
        access: AccessMode,
    ) -> Result<MemHandle> {
        let flags = match access {
            AccessMode::ReadOnly => CL_MEM_READ_ONLY,
            AccessMode::WriteOnly => CL_MEM_WRITE_ONLY,
            AccessMode::ReadWrite => CL_MEM_READ_WRITE,
        };

        let mut state = self.state.lock();
        let (ctx, _) = state.contexts.get(&context).ok_or(stale("context"))?;
        // SAFETY: no host pointer is supplied.
        let buffer = unsafe { Buffer::<u8>::create(ctx, flags, size, std::ptr::null_mut()) }
            .map_err(cl("clCreateBuffer"))?;

        let handle = MemHandle(self.next_handle());
        state.buffers.insert(handle, (context, buffer));
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
        let mut state = self.state.lock();
        let (ctx, members) = state.contexts.get(&context).ok_or(stale("context"))?;
        if let Some(device) = devices.iter().find(|d| !members.contains(d)) {
            return Err(Error::DeviceNotInContext { device: *device });
        }

        let raw: Vec<cl_device_id> = devices
            .iter()
            .map(|d| self.device(*d).map(ClDevice::id))
            .collect::<Result<_>>()?;

        let mut program =
            Program::create_from_source(ctx, source).map_err(cl("clCreateProgramWithSource"))?;

        if program.build(&raw, BUILD_OPTIONS).is_err() {
            let mut logs = Vec::with_capacity(devices.len());
            for id in devices {
                let device = self.device(*id)?;
                let log = program.get_build_log(device.id()).unwrap_or_default();
                let status = program.get_build_status(device.id()).unwrap_or(-1);
                logs.push(DeviceBuildLog {
                    device: *id,
                    device_name: device.info.name.clone(),
                    succeeded: status == 0,
                    log,
                });
            }
            return Err(BuildError::new(logs).into());
        }

        let names = program
            .get_kernel_names()
            .map_err(cl("clGetProgramInfo"))?;
        let kernels = Self::signatures(&names, &program)?;

        let handle = ProgramHandle(self.next_handle());
        state.programs.insert(
            handle,
            ClProgram {
                context,
                program,
                devices: devices.to_vec(),
                kernels,
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
        state.kernels.retain(|_, (p, _)| *p != program);
        state.programs.remove(&program);
    }

    fn create_kernel(&self, program: ProgramHandle, name: &str) -> Result<KernelHandle> {
        let mut state = self.state.lock();
        let record = state.programs.get(&program).ok_or(stale("program"))?;
        if !record.kernels.iter().any(|k| k.name == name) {
            return Err(Error::KernelNotFound {
                name: name.to_string(),
            });
        }
        let kernel = Kernel::create(&record.program, name).map_err(cl("clCreateKernel"))?;

        let handle = KernelHandle(self.next_handle());
        state.kernels.insert(handle, (program, kernel));
        Ok(handle)
    }

    fn kernel_work_group_info(
        &self,
        kernel: KernelHandle,
        device: DeviceId,
    ) -> Result<KernelWorkGroupInfo> {
        let state = self.state.lock();
        let (program, kernel) = state.kernels.get(&kernel).ok_or(stale("kernel"))?;
        let record = state.programs.get(program).ok_or(stale("program"))?;
        if !record.devices.contains(&device) {
            return Err(Error::DeviceNotInContext { device });
        }
        let raw = self.device(device)?.id();
        let call = cl("clGetKernelWorkGroupInfo");

        Ok(KernelWorkGroupInfo {
            local_mem_size: kernel.get_local_mem_size(raw).map_err(&call)?,
            private_mem_size: kernel.get_private_mem_size(raw).map_err(&call)?,
            preferred_work_group_size_multiple: kernel
                .get_work_group_size_multiple(raw)
                .map_err(&call)?,
            work_group_size: kernel.get_work_group_size(raw).map_err(&call)?,
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
        let mut state = self.state.lock();
        let ClState {
            queues, buffers, ..
        } = &mut *state;
        let (queue_ctx, queue) = queues.get(&queue).ok_or(stale("queue"))?;
        let (buffer_ctx, buffer) = buffers.get_mut(&mem).ok_or(stale("buffer"))?;
        if queue_ctx != buffer_ctx {
            return Err(Error::ContextMismatch { resource: "buffer" });
        }

        // SAFETY: the call blocks, so `data` outlives the transfer.
        unsafe { queue.enqueue_write_buffer(buffer, CL_BLOCKING, offset, &data, &[]) }
            .map_err(cl("clEnqueueWriteBuffer"))?;
        Ok(Event::completed(Ok(Vec::new())))
    }

    fn enqueue_read(
        &self,
        queue: QueueHandle,
        mem: MemHandle,
        offset: usize,
        len: usize,
    ) -> Result<Event> {
        let state = self.state.lock();
        let (queue_ctx, queue) = state.queues.get(&queue).ok_or(stale("queue"))?;
        let (buffer_ctx, buffer) = state.buffers.get(&mem).ok_or(stale("buffer"))?;
        if queue_ctx != buffer_ctx {
            return Err(Error::ContextMismatch { resource: "buffer" });
        }

        let mut data = vec![0u8; len];
        // SAFETY: the call blocks, so `data` outlives the transfer.
        unsafe { queue.enqueue_read_buffer(buffer, CL_BLOCKING, offset, &mut data, &[]) }
            .map_err(cl("clEnqueueReadBuffer"))?;
        Ok(Event::completed(Ok(data)))
    }

    fn enqueue_kernel(
        &self,
        queue: QueueHandle,
        kernel: KernelHandle,
        args: Vec<RawArg>,
        work: &WorkSize,
    ) -> Result<Event> {
        // arguments and launch go in under the lock; the wait does not
        let queue = {
            let state = self.state.lock();
            let (queue_ctx, queue) = state.queues.get(&queue).ok_or(stale("queue"))?;
            let (_, kernel) = state.kernels.get(&kernel).ok_or(stale("kernel"))?;

            for (index, arg) in args.iter().enumerate() {
                let index = index as u32;
                // SAFETY: every pointer handed to clSetKernelArg is valid for the call.
                let result = unsafe {
                    match arg {
                        RawArg::Mem(handle) => {
                            let (ctx, buffer) =
                                state.buffers.get(handle).ok_or(stale("buffer"))?;
                            if ctx != queue_ctx {
                                return Err(Error::ContextMismatch { resource: "buffer" });
                            }
                            let mem: cl_mem = buffer.get();
                            kernel.set_arg(index, &mem)
                        }
                        RawArg::Local(len) => kernel.set_arg_local_buffer(index, *len),
                        RawArg::Scalar(bytes) => opencl3::kernel::set_kernel_arg(
                            kernel.get(),
                            index,
                            bytes.len(),
                            bytes.as_ptr() as *const c_void,
                        ),
                    }
                };
                result.map_err(cl("clSetKernelArg"))?;
            }

            let global = work.global();
            let local_ptr = work.local().map_or(std::ptr::null(), |l| l.as_ptr());
            // SAFETY: the size arrays have `dims` entries and outlive the call.
            unsafe {
                queue.enqueue_nd_range_kernel(
                    kernel.get(),
                    global.len() as u32,
                    std::ptr::null(),
                    global.as_ptr(),
                    local_ptr,
                    &[],
                )
            }
            .map_err(cl("clEnqueueNDRangeKernel"))?;
            queue.clone()
        };

        queue.finish().map_err(cl("clFinish"))?;
        Ok(Event::completed(Ok(Vec::new())))
    }

    fn finish(&self, queue: QueueHandle) -> Result<()> {
        let queue = {
            let state = self.state.lock();
            let (_, queue) = state.queues.get(&queue).ok_or(stale("queue"))?;
            queue.clone()
        };
        queue.finish().map_err(cl("clFinish"))
    }
}

impl std::fmt::Debug for OpenClDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenClDriver")
            .field("platforms", &self.platforms.len())
            .field("devices", &self.devices.len())
            .finish()
    }
}
