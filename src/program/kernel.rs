use super::ProgramInner;
use crate::catalog::Device;
use crate::dispatch::Buffer;
use crate::driver::{ArgKind, ArgSignature, KernelHandle, KernelSignature, KernelWorkGroupInfo, RawArg};
use crate::error::{checked, Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A `__local` argument of the given size in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalMemory(pub usize);

/// A value bound to a kernel argument slot.
#[derive(Debug, Clone)]
pub enum BoundArg {
    Buffer(Buffer),
    Local(usize),
    Scalar {
        bytes: Vec<u8>,
        type_name: &'static str,
    },
}

impl BoundArg {
    fn describe(&self) -> String {
        match self {
            BoundArg::Buffer(_) => "buffer".to_string(),
            BoundArg::Local(n) => format!("{} bytes of local memory", n),
            BoundArg::Scalar { bytes, type_name } => {
                format!("{}-byte scalar ({})", bytes.len(), type_name)
            }
        }
    }

    fn fits(&self, kind: ArgKind) -> bool {
        match (self, kind) {
            (BoundArg::Buffer(_), kind) => kind.is_buffer(),
            (BoundArg::Local(n), ArgKind::LocalMemory) => *n > 0,
            (BoundArg::Scalar { bytes, .. }, ArgKind::Scalar { size }) => bytes.len() == size,
            _ => false,
        }
    }
}

/// Values that can be bound with [`Kernel::set_arg`].
pub trait KernelArg {
    fn into_bound(self) -> BoundArg;
}

impl KernelArg for &Buffer {
    fn into_bound(self) -> BoundArg {
        BoundArg::Buffer(self.clone())
    }
}

impl KernelArg for LocalMemory {
    fn into_bound(self) -> BoundArg {
        BoundArg::Local(self.0)
    }
}

macro_rules! scalar_arg {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl KernelArg for $ty {
                fn into_bound(self) -> BoundArg {
                    BoundArg::Scalar {
                        bytes: bytemuck::bytes_of(&self).to_vec(),
                        type_name: $name,
                    }
                }
            }
        )*
    };
}

scalar_arg! {
    f32 => "float",
    f64 => "double",
    i32 => "int",
    u32 => "uint",
    i64 => "long",
    u64 => "ulong",
}

pub(crate) struct KernelInner {
    pub program: Arc<ProgramInner>,
    pub handle: KernelHandle,
    pub signature: KernelSignature,
    released: AtomicBool,
}

impl KernelInner {
    pub(crate) fn new(
        program: Arc<ProgramInner>,
        handle: KernelHandle,
        signature: KernelSignature,
    ) -> Self {
        Self {
            program,
            handle,
            signature,
            released: AtomicBool::new(false),
        }
    }

    pub fn ensure_live(&self) -> Result<()> {
        self.program.ctx.ensure_open("kernel")?;
        if self.released.load(Ordering::Acquire) || self.program.is_released() {
            return Err(Error::UseAfterClose { resource: "kernel" });
        }
        Ok(())
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.program.ctx.driver.release_kernel(self.handle);
        }
    }
}

impl Drop for KernelInner {
    fn drop(&mut self) {
        self.release();
    }
}

/// An entry point of a built program plus its argument slots.
///
/// Clones share the kernel object but carry their own argument values.
#[derive(Clone)]
pub struct Kernel {
    pub(crate) inner: Arc<KernelInner>,
    slots: Vec<Option<BoundArg>>,
}

impl Kernel {
    pub(crate) fn new(inner: KernelInner) -> Self {
        let slots = vec![None; inner.signature.args.len()];
        Self {
            inner: Arc::new(inner),
            slots,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.signature.name
    }

    pub fn signature(&self) -> &KernelSignature {
        &self.inner.signature
    }

    pub fn num_args(&self) -> usize {
        self.slots.len()
    }

    /// Binds `value` to slot `index`. The value is checked against the
    /// declared argument kind now and captured again at each dispatch.
    pub fn set_arg<A: KernelArg>(&mut self, index: usize, value: A) -> Result<()> {
        let step = "clSetKernelArg";
        checked(step, self.set_arg_inner(index, value.into_bound()))
    }

    fn set_arg_inner(&mut self, index: usize, value: BoundArg) -> Result<()> {
        self.inner.ensure_live()?;

        let count = self.slots.len();
        let declared = self
            .inner
            .signature
            .args
            .get(index)
            .ok_or(Error::InvalidArgumentIndex { index, count })?;

        if !value.fits(declared.kind) {
            return Err(Error::ArgumentTypeMismatch {
                index,
                expected: describe_declared(declared),
                found: value.describe(),
            });
        }

        if let BoundArg::Buffer(buffer) = &value {
            buffer.inner.ensure_live()?;
            if !buffer.same_context(&self.inner.program.ctx) {
                return Err(Error::ContextMismatch { resource: "buffer" });
            }
        }

        self.slots[index] = Some(value);
        Ok(())
    }

    pub fn is_bound(&self, index: usize) -> bool {
        self.slots.get(index).is_some_and(Option::is_some)
    }

    /// Snapshot of the bound values, in slot order.
    pub(crate) fn capture_args(&self) -> Result<Vec<RawArg>> {
        let mut args = Vec::with_capacity(self.slots.len());
        for (index, slot) in self.slots.iter().enumerate() {
            let raw = match slot {
                None => {
                    return Err(Error::UnboundArgument {
                        kernel: self.name().to_string(),
                        index,
                    })
                }
                Some(BoundArg::Buffer(buffer)) => {
                    buffer.inner.ensure_live()?;
                    RawArg::Mem(buffer.inner.handle)
                }
                Some(BoundArg::Local(n)) => RawArg::Local(*n),
                Some(BoundArg::Scalar { bytes, .. }) => RawArg::Scalar(bytes.clone()),
            };
            args.push(raw);
        }
        Ok(args)
    }

    /// Per-device limits for this kernel.
    pub fn work_group_info(&self, device: &Device) -> Result<KernelWorkGroupInfo> {
        self.inner.ensure_live()?;
        let driver = &self.inner.program.ctx.driver;
        checked(
            "clGetKernelWorkGroupInfo",
            driver.kernel_work_group_info(self.inner.handle, device.id()),
        )
    }

    pub fn is_released(&self) -> bool {
        self.inner.ensure_live().is_err()
    }

    /// Releases the kernel object for every clone. Idempotent.
    pub fn release(&self) {
        self.inner.release();
    }
}

fn describe_declared(arg: &ArgSignature) -> String {
    format!("{} ({} {})", arg.kind, arg.type_name, arg.name)
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bound = self.slots.iter().filter(|s| s.is_some()).count();
        f.debug_struct("Kernel")
            .field("name", &self.name())
            .field("args", &self.slots.len())
            .field("bound", &bound)
            .finish()
    }
}
