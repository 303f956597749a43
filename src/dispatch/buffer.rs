use crate::context::{Context, ContextInner};
use crate::driver::MemHandle;
use crate::error::{checked, Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// How kernels may use a buffer. Host transfers are allowed either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

pub(crate) struct BufferInner {
    pub ctx: Arc<ContextInner>,
    pub handle: MemHandle,
    pub size: usize,
    pub access: AccessMode,
    released: AtomicBool,
}

impl BufferInner {
    pub fn ensure_live(&self) -> Result<()> {
        self.ctx.ensure_open("buffer")?;
        if self.released.load(Ordering::Acquire) {
            return Err(Error::UseAfterClose { resource: "buffer" });
        }
        Ok(())
    }

    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.ctx.driver.release_buffer(self.handle);
            self.ctx.unreserve(self.size as u64);
        }
    }
}

impl Drop for BufferInner {
    fn drop(&mut self) {
        self.release();
    }
}

/// A fixed-size device memory object owned by one context.
///
/// Clones refer to the same memory object; it is freed on the first
/// [`Buffer::release`], when the last clone is dropped, or when the context
/// closes.
#[derive(Clone)]
pub struct Buffer {
    pub(crate) inner: Arc<BufferInner>,
}

impl Buffer {
    pub fn allocate(context: &Context, size: usize, access: AccessMode) -> Result<Self> {
        checked("clCreateBuffer", Self::allocate_inner(context, size, access))
    }

    fn allocate_inner(context: &Context, size: usize, access: AccessMode) -> Result<Self> {
        let ctx = context.inner();
        ctx.ensure_open("context")?;
        ctx.reserve(size as u64)?;

        let handle = match ctx.driver.create_buffer(ctx.handle, size, access) {
            Ok(handle) => handle,
            Err(err) => {
                ctx.unreserve(size as u64);
                return Err(err);
            }
        };

        let inner = Arc::new(BufferInner {
            ctx: ctx.clone(),
            handle,
            size,
            access,
            released: AtomicBool::new(false),
        });
        ctx.track_buffer(&inner);
        Ok(Self { inner })
    }

    /// Allocates a buffer sized for `len` elements of `T`.
    pub fn allocate_for<T>(context: &Context, len: usize, access: AccessMode) -> Result<Self> {
        let size = len
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(Error::Allocation {
                requested: u64::MAX,
                available: 0,
            })?;
        Self::allocate(context, size, access)
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    pub fn access(&self) -> AccessMode {
        self.inner.access
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire) || self.inner.ctx.is_closed()
    }

    /// Frees the device memory. Idempotent.
    pub fn release(&self) {
        self.inner.release();
    }

    pub(crate) fn same_context(&self, ctx: &Arc<ContextInner>) -> bool {
        Arc::ptr_eq(&self.inner.ctx, ctx)
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("handle", &self.inner.handle)
            .field("size", &self.inner.size)
            .field("access", &self.inner.access)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DeviceCatalog;
    use crate::config::Config;

    fn context() -> (DeviceCatalog, Context) {
        let config = Config::builder().compute_units(1).build().unwrap();
        let catalog = DeviceCatalog::host(&config).unwrap();
        let devices = vec![catalog.devices()[0].clone()];
        let context = Context::open(&catalog, &devices).unwrap();
        (catalog, context)
    }

    #[test]
    fn test_release_returns_budget() {
        let (_catalog, context) = context();
        let buffer = Buffer::allocate_for::<f32>(&context, 256, AccessMode::ReadWrite).unwrap();
        assert_eq!(buffer.size(), 1024);
        assert_eq!(context.allocated_bytes(), 1024);

        let clone = buffer.clone();
        buffer.release();
        buffer.release();
        assert!(clone.is_released());
        assert_eq!(context.allocated_bytes(), 0);
    }

    #[test]
    fn test_drop_of_last_clone_frees_memory() {
        let (_catalog, context) = context();
        {
            let _buffer = Buffer::allocate(&context, 64, AccessMode::ReadOnly).unwrap();
            assert_eq!(context.allocated_bytes(), 64);
        }
        assert_eq!(context.allocated_bytes(), 0);
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let (_catalog, context) = context();
        let err = Buffer::allocate(&context, 0, AccessMode::ReadWrite).unwrap_err();
        assert!(matches!(err, Error::Allocation { requested: 0, .. }));
    }

    #[test]
    fn test_closed_context_refuses_allocation() {
        let (_catalog, context) = context();
        let buffer = Buffer::allocate(&context, 16, AccessMode::ReadWrite).unwrap();
        context.close();
        assert!(buffer.is_released());
        assert!(matches!(
            Buffer::allocate(&context, 16, AccessMode::ReadWrite),
            Err(Error::UseAfterClose { .. })
        ));
    }
}
