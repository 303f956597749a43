//! Execution Context: devices of one platform plus the queues, buffers and
//! programs created against them.
//!
//! Resources hold a strong reference to the context state and the context
//! tracks them weakly, so closing the context can release everything that is
//! still alive. After [`Context::close`] every operation on the context or
//! anything derived from it fails with [`Error::UseAfterClose`].

use crate::catalog::{Device, DeviceCatalog, Platform};
use crate::dispatch::buffer::BufferInner;
use crate::driver::{ContextHandle, DeviceId, Driver, QueueHandle};
use crate::error::{checked, Error, Result};
use crate::program::ProgramInner;
use crate::telemetry::{Metrics, MetricsSnapshot};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

#[derive(Default)]
struct Children {
    queues: Vec<Weak<QueueInner>>,
    buffers: Vec<Weak<BufferInner>>,
    programs: Vec<Weak<ProgramInner>>,
}

pub(crate) struct ContextInner {
    pub driver: Arc<dyn Driver>,
    pub handle: ContextHandle,
    pub platform: Platform,
    pub devices: Vec<Device>,
    pub metrics: Arc<Metrics>,
    closed: AtomicBool,
    children: Mutex<Children>,
    allocated: Mutex<u64>,
    memory_limit: u64,
    max_alloc: u64,
}

impl ContextInner {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn ensure_open(&self, resource: &'static str) -> Result<()> {
        if self.is_closed() {
            Err(Error::UseAfterClose { resource })
        } else {
            Ok(())
        }
    }

    pub fn contains(&self, device: DeviceId) -> bool {
        self.devices.iter().any(|d| d.id() == device)
    }

    /// Accounts `bytes` against the context's memory budget.
    pub fn reserve(&self, bytes: u64) -> Result<()> {
        if bytes == 0 || bytes > self.max_alloc {
            return Err(Error::Allocation {
                requested: bytes,
                available: self.max_alloc,
            });
        }

        let mut allocated = self.allocated.lock();
        let available = self.memory_limit.saturating_sub(*allocated);
        if bytes > available {
            return Err(Error::Allocation {
                requested: bytes,
                available,
            });
        }
        *allocated += bytes;
        self.metrics.record_allocation(bytes);
        Ok(())
    }

    pub fn unreserve(&self, bytes: u64) {
        let mut allocated = self.allocated.lock();
        *allocated = allocated.saturating_sub(bytes);
        self.metrics.record_release(bytes);
    }

    pub fn track_buffer(&self, buffer: &Arc<BufferInner>) {
        let mut children = self.children.lock();
        children.buffers.retain(|b| b.strong_count() > 0);
        children.buffers.push(Arc::downgrade(buffer));
    }

    pub fn track_program(&self, program: &Arc<ProgramInner>) {
        let mut children = self.children.lock();
        children.programs.retain(|p| p.strong_count() > 0);
        children.programs.push(Arc::downgrade(program));
    }

    fn track_queue(&self, queue: &Arc<QueueInner>) {
        let mut children = self.children.lock();
        children.queues.retain(|q| q.strong_count() > 0);
        children.queues.push(Arc::downgrade(queue));
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let children = std::mem::take(&mut *self.children.lock());

        // queues first so in-flight commands drain against live memory
        for queue in children.queues.iter().filter_map(Weak::upgrade) {
            queue.release();
        }
        for program in children.programs.iter().filter_map(Weak::upgrade) {
            program.release();
        }
        for buffer in children.buffers.iter().filter_map(Weak::upgrade) {
            buffer.release();
        }

        self.driver.release_context(self.handle);
        tracing::debug!("Step clReleaseContext, status = 0");
    }
}

/// One or more devices of a single platform, and the owner of everything
/// created against them. Dropping the context closes it.
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    pub fn open(catalog: &DeviceCatalog, devices: &[Device]) -> Result<Self> {
        checked("clCreateContext", Self::open_inner(catalog, devices))
    }

    fn open_inner(catalog: &DeviceCatalog, devices: &[Device]) -> Result<Self> {
        let Some(first) = devices.first() else {
            return Err(Error::context_creation("no devices given"));
        };

        let platform_id = first.platform();
        if devices.iter().any(|d| d.platform() != platform_id) {
            return Err(Error::context_creation(
                "devices belong to different platforms",
            ));
        }
        for device in devices {
            if catalog.device(device.id()) != Some(device) {
                return Err(Error::context_creation(format!(
                    "device '{}' is not part of this catalog",
                    device.name()
                )));
            }
        }
        let platform = catalog
            .platforms()
            .iter()
            .find(|p| p.id() == platform_id)
            .cloned()
            .ok_or_else(|| Error::context_creation("unknown platform"))?;

        let mut unique: Vec<Device> = Vec::with_capacity(devices.len());
        for device in devices {
            if !unique.contains(device) {
                unique.push(device.clone());
            }
        }

        let ids: Vec<DeviceId> = unique.iter().map(Device::id).collect();
        let driver = catalog.driver().clone();
        let handle = driver.create_context(&ids)?;

        let memory_limit = unique
            .iter()
            .map(|d| d.limits().global_mem_size)
            .min()
            .unwrap_or(0);
        let max_alloc = unique
            .iter()
            .map(|d| d.limits().max_mem_alloc_size)
            .min()
            .unwrap_or(0);

        Ok(Self {
            inner: Arc::new(ContextInner {
                driver,
                handle,
                platform,
                devices: unique,
                metrics: Arc::new(Metrics::new()),
                closed: AtomicBool::new(false),
                children: Mutex::new(Children::default()),
                allocated: Mutex::new(0),
                memory_limit,
                max_alloc,
            }),
        })
    }

    pub(crate) fn inner(&self) -> &Arc<ContextInner> {
        &self.inner
    }

    pub fn platform(&self) -> &Platform {
        &self.inner.platform
    }

    pub fn devices(&self) -> &[Device] {
        &self.inner.devices
    }

    pub fn contains(&self, device: &Device) -> bool {
        self.inner.contains(device.id())
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Bytes currently held by live buffers of this context.
    pub fn allocated_bytes(&self) -> u64 {
        *self.inner.allocated.lock()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn open_queue(&self, device: &Device) -> Result<Queue> {
        checked("clCreateCommandQueue", self.open_queue_inner(device))
    }

    fn open_queue_inner(&self, device: &Device) -> Result<Queue> {
        self.inner.ensure_open("context")?;
        if !self.contains(device) {
            return Err(Error::DeviceNotInContext {
                device: device.id(),
            });
        }

        let handle = self.inner.driver.create_queue(self.inner.handle, device.id())?;
        let queue = Arc::new(QueueInner {
            ctx: self.inner.clone(),
            handle,
            device: device.clone(),
            released: AtomicBool::new(false),
            submitted: AtomicU64::new(0),
        });
        self.inner.track_queue(&queue);
        Ok(Queue { inner: queue })
    }

    /// Drains and releases every queue, then releases programs and buffers.
    /// Idempotent.
    pub fn close(&self) {
        self.inner.close();
    }

    pub fn release(&self) {
        self.close();
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.inner.close();
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("handle", &self.inner.handle)
            .field("devices", &self.inner.devices)
            .field("closed", &self.is_closed())
            .finish()
    }
}

pub(crate) struct QueueInner {
    pub ctx: Arc<ContextInner>,
    pub handle: QueueHandle,
    pub device: Device,
    released: AtomicBool,
    pub submitted: AtomicU64,
}

impl QueueInner {
    pub fn ensure_live(&self) -> Result<()> {
        self.ctx.ensure_open("queue")?;
        if self.released.load(Ordering::Acquire) {
            return Err(Error::UseAfterClose { resource: "queue" });
        }
        Ok(())
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.ctx.driver.release_queue(self.handle);
        }
    }
}

impl Drop for QueueInner {
    fn drop(&mut self) {
        self.release();
    }
}

/// An in-order command queue bound to one device of one context.
///
/// Transfer and dispatch operations live in [`crate::dispatch`].
pub struct Queue {
    pub(crate) inner: Arc<QueueInner>,
}

impl Queue {
    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    /// Commands accepted by this queue so far.
    pub fn submitted(&self) -> u64 {
        self.inner.submitted.load(Ordering::Relaxed)
    }

    /// Blocks until every submitted command has completed.
    pub fn finish(&self) -> Result<()> {
        self.inner.ensure_live()?;
        checked(
            "clFinish",
            self.inner.ctx.driver.finish(self.inner.handle),
        )
    }

    /// Drains outstanding commands and releases the queue. Idempotent.
    pub fn release(&self) {
        self.inner.release();
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire) || self.inner.ctx.is_closed()
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("handle", &self.inner.handle)
            .field("device", &self.inner.device)
            .field("submitted", &self.submitted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DeviceFilter;
    use crate::config::Config;

    fn catalog() -> DeviceCatalog {
        let config = Config::builder().compute_units(2).build().unwrap();
        DeviceCatalog::host(&config).unwrap()
    }

    #[test]
    fn test_empty_device_set_is_rejected() {
        let catalog = catalog();
        let err = Context::open(&catalog, &[]).unwrap_err();
        assert!(matches!(err, Error::ContextCreation(_)));
    }

    #[test]
    fn test_queue_for_foreign_device() {
        let catalog = catalog();
        let platform = &catalog.platforms()[0];
        let cpu = catalog.list_devices(platform, DeviceFilter::Cpu).unwrap();
        let gpu = catalog.list_devices(platform, DeviceFilter::Gpu).unwrap();

        let context = Context::open(&catalog, &cpu).unwrap();
        let err = context.open_queue(&gpu[0]).unwrap_err();
        assert!(matches!(err, Error::DeviceNotInContext { .. }));
    }

    #[test]
    fn test_close_is_idempotent_and_invalidates_queues() {
        let catalog = catalog();
        let devices = catalog.devices().to_vec();
        let context = Context::open(&catalog, &devices).unwrap();
        let queue = context.open_queue(&devices[0]).unwrap();

        context.close();
        context.close();

        assert!(context.is_closed());
        assert!(queue.is_released());
        assert!(matches!(
            queue.finish(),
            Err(Error::UseAfterClose { resource: "queue" })
        ));
        assert!(matches!(
            context.open_queue(&devices[0]),
            Err(Error::UseAfterClose { .. })
        ));
    }

    #[test]
    fn test_reservation_respects_limits() {
        let catalog = catalog();
        let gpu = catalog
            .find_devices(DeviceFilter::Gpu, |_| true)
            .remove(0);
        let context = Context::open(&catalog, &[gpu.clone()]).unwrap();
        let inner = context.inner();
        let max_alloc = gpu.limits().max_mem_alloc_size;

        assert!(inner.reserve(0).is_err());
        assert!(inner.reserve(max_alloc + 1).is_err());

        for _ in 0..4 {
            inner.reserve(max_alloc).unwrap();
        }
        let err = inner.reserve(1).unwrap_err();
        assert!(matches!(err, Error::Allocation { available: 0, .. }));

        inner.unreserve(max_alloc);
        assert_eq!(context.allocated_bytes(), 3 * max_alloc);
    }
}
