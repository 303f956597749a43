//! Transfer & Dispatch Engine.
//!
//! Buffers are allocated against a [`Context`](crate::Context); uploads,
//! kernel launches and downloads are enqueued on a [`Queue`] and complete in
//! submission order. Every enqueue returns a handle that can be waited on.

pub mod buffer;
pub mod completion;
pub mod work_size;

pub use buffer::{AccessMode, Buffer};
pub use completion::{CompletionHandle, PendingRead};
pub use work_size::WorkSize;

use crate::context::Queue;
use crate::error::{checked, Error, Result};
use crate::program::Kernel;
use bytemuck::Pod;
use std::sync::atomic::Ordering;
use std::sync::Arc;

impl Queue {
    /// Copies `data` into the start of `buffer`. The data is captured before
    /// this returns; with `blocking` the call also waits for the write.
    pub fn upload<T: Pod>(
        &self,
        buffer: &Buffer,
        data: &[T],
        blocking: bool,
    ) -> Result<CompletionHandle> {
        let handle = checked("clEnqueueWriteBuffer", self.upload_inner(buffer, data))?;
        if blocking {
            handle.wait()?;
        }
        Ok(handle)
    }

    fn upload_inner<T: Pod>(&self, buffer: &Buffer, data: &[T]) -> Result<CompletionHandle> {
        self.ensure_usable(buffer)?;

        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() > buffer.size() {
            return Err(Error::transfer(format!(
                "{} bytes do not fit in a buffer of {} bytes",
                bytes.len(),
                buffer.size()
            )));
        }

        let ctx = &self.inner.ctx;
        let event = ctx.driver.enqueue_write(
            self.inner.handle,
            buffer.inner.handle,
            0,
            bytes.to_vec(),
        )?;
        self.inner.submitted.fetch_add(1, Ordering::Relaxed);
        ctx.metrics.record_upload(bytes.len());
        Ok(CompletionHandle::new(event, ctx.metrics.clone()))
    }

    /// Launches `kernel` over `work` with the argument values bound right now.
    /// Later `set_arg` calls do not affect this launch.
    pub fn dispatch(&self, kernel: &Kernel, work: &WorkSize) -> Result<CompletionHandle> {
        checked("clEnqueueNDRangeKernel", self.dispatch_inner(kernel, work))
    }

    fn dispatch_inner(&self, kernel: &Kernel, work: &WorkSize) -> Result<CompletionHandle> {
        self.inner.ensure_live()?;
        kernel.inner.ensure_live()?;

        let ctx = &self.inner.ctx;
        let program = &kernel.inner.program;
        if !Arc::ptr_eq(&program.ctx, ctx) {
            return Err(Error::ContextMismatch { resource: "kernel" });
        }

        let device = &self.inner.device;
        if !program.devices.iter().any(|d| d == device) {
            return Err(Error::DeviceNotInContext {
                device: device.id(),
            });
        }

        let args = kernel.capture_args()?;
        work.validate(device.max_work_group_size())?;

        let event = ctx
            .driver
            .enqueue_kernel(self.inner.handle, kernel.inner.handle, args, work)?;
        self.inner.submitted.fetch_add(1, Ordering::Relaxed);
        ctx.metrics.record_dispatch(work.total_items() as u64);

        tracing::trace!(
            kernel = kernel.name(),
            work = %work,
            device = device.name(),
            "dispatch enqueued"
        );
        Ok(CompletionHandle::new(event, ctx.metrics.clone()))
    }

    /// Reads the start of `buffer` into `out`, after every command submitted
    /// before it has completed.
    pub fn download<T: Pod>(&self, buffer: &Buffer, out: &mut [T]) -> Result<()> {
        let len = std::mem::size_of_val(out);
        let pending = checked(
            "clEnqueueReadBuffer",
            self.read_inner::<u8>(buffer, len),
        )?;
        let bytes = pending.wait()?;
        bytemuck::cast_slice_mut::<T, u8>(out).copy_from_slice(&bytes);
        Ok(())
    }

    /// Enqueues a read of the whole buffer and returns without waiting.
    pub fn download_async<T: Pod>(&self, buffer: &Buffer) -> Result<PendingRead<T>> {
        let elem = std::mem::size_of::<T>();
        if elem == 0 || buffer.size() % elem != 0 {
            return Err(Error::transfer(format!(
                "buffer of {} bytes is not a whole number of {}",
                buffer.size(),
                std::any::type_name::<T>()
            )));
        }
        checked(
            "clEnqueueReadBuffer",
            self.read_inner::<T>(buffer, buffer.size()),
        )
    }

    fn read_inner<T: Pod>(&self, buffer: &Buffer, len: usize) -> Result<PendingRead<T>> {
        self.ensure_usable(buffer)?;
        if len > buffer.size() {
            return Err(Error::transfer(format!(
                "cannot read {} bytes from a buffer of {} bytes",
                len,
                buffer.size()
            )));
        }

        let ctx = &self.inner.ctx;
        let event = ctx
            .driver
            .enqueue_read(self.inner.handle, buffer.inner.handle, 0, len)?;
        self.inner.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(PendingRead::new(event, ctx.metrics.clone()))
    }

    fn ensure_usable(&self, buffer: &Buffer) -> Result<()> {
        self.inner.ensure_live()?;
        buffer.inner.ensure_live()?;
        if !buffer.same_context(&self.inner.ctx) {
            return Err(Error::ContextMismatch { resource: "buffer" });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DeviceCatalog, DeviceFilter};
    use crate::config::Config;
    use crate::context::Context;
    use crate::program::ProgramCache;

    const SAXPY: &str = r#"
        __kernel void saxpy(const float a, __global const float *X,
                            __global const float *Y, const int n,
                            __global float *Z)
        {
            int i = get_global_id(0);
            if (i < n) Z[i] = a * X[i] + Y[i];
        }
    "#;

    fn setup() -> (DeviceCatalog, Context, Queue) {
        let config = Config::builder().compute_units(2).build().unwrap();
        let catalog = DeviceCatalog::host(&config).unwrap();
        let platform = catalog.platforms()[0].clone();
        let devices = catalog.list_devices(&platform, DeviceFilter::Cpu).unwrap();
        let context = Context::open(&catalog, &devices).unwrap();
        let queue = context.open_queue(&devices[0]).unwrap();
        (catalog, context, queue)
    }

    #[test]
    fn test_upload_that_does_not_fit() {
        let (_catalog, context, queue) = setup();
        let buffer = Buffer::allocate_for::<f32>(&context, 4, AccessMode::ReadOnly).unwrap();

        let err = queue.upload(&buffer, &[0f32; 5], true).unwrap_err();
        assert!(matches!(err, Error::Transfer(_)));
        assert_eq!(queue.submitted(), 0);
    }

    #[test]
    fn test_upload_then_download() {
        let (_catalog, context, queue) = setup();
        let buffer = Buffer::allocate_for::<i32>(&context, 3, AccessMode::ReadWrite).unwrap();

        queue.upload(&buffer, &[7i32, -1, 42], false).unwrap();
        let mut out = [0i32; 3];
        queue.download(&buffer, &mut out).unwrap();

        assert_eq!(out, [7, -1, 42]);
        assert_eq!(queue.submitted(), 2);
    }

    #[test]
    fn test_dispatch_captures_arguments_at_enqueue() {
        let (_catalog, context, queue) = setup();
        let cache = ProgramCache::default();
        let program = cache.build(&context, SAXPY, &[]).unwrap();
        let mut kernel = program.kernel("saxpy").unwrap();

        let n = 8usize;
        let x = Buffer::allocate_for::<f32>(&context, n, AccessMode::ReadOnly).unwrap();
        let y = Buffer::allocate_for::<f32>(&context, n, AccessMode::ReadOnly).unwrap();
        let z = Buffer::allocate_for::<f32>(&context, n, AccessMode::WriteOnly).unwrap();
        queue.upload(&x, &vec![1.0f32; n], false).unwrap();
        queue.upload(&y, &vec![2.0f32; n], false).unwrap();

        kernel.set_arg(0, 3.0f32).unwrap();
        kernel.set_arg(1, &x).unwrap();
        kernel.set_arg(2, &y).unwrap();
        kernel.set_arg(3, n as i32).unwrap();
        kernel.set_arg(4, &z).unwrap();

        let done = queue.dispatch(&kernel, &WorkSize::one_d(n)).unwrap();
        kernel.set_arg(0, 100.0f32).unwrap();
        done.wait().unwrap();

        let read = queue.download_async::<f32>(&z).unwrap();
        assert_eq!(read.wait().unwrap(), vec![5.0f32; n]);
    }

    #[test]
    fn test_invalid_work_size_enqueues_nothing() {
        let (_catalog, context, queue) = setup();
        let program = ProgramCache::default().build(&context, SAXPY, &[]).unwrap();
        let mut kernel = program.kernel("saxpy").unwrap();
        let buffer = Buffer::allocate_for::<f32>(&context, 4, AccessMode::ReadWrite).unwrap();
        kernel.set_arg(0, 1.0f32).unwrap();
        kernel.set_arg(1, &buffer).unwrap();
        kernel.set_arg(2, &buffer).unwrap();
        kernel.set_arg(3, 4i32).unwrap();
        kernel.set_arg(4, &buffer).unwrap();

        let before = queue.submitted();
        let err = queue
            .dispatch(&kernel, &WorkSize::one_d(10).with_local(&[4]))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidWorkSize(_)));
        assert_eq!(queue.submitted(), before);
    }

    #[test]
    fn test_buffer_from_other_context() {
        let (catalog, context, queue) = setup();
        let other = Context::open(&catalog, context.devices()).unwrap();
        let foreign = Buffer::allocate(&other, 16, AccessMode::ReadWrite).unwrap();

        let err = queue.upload(&foreign, &[0u8; 4], true).unwrap_err();
        assert!(matches!(err, Error::ContextMismatch { resource: "buffer" }));
    }
}
