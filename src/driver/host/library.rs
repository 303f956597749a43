//! Native kernel bodies executed by host devices.
//!
//! A host program build binds each `__kernel` entry point in the source to a
//! [`NativeKernel`] of the same name. At dispatch time the kernel is handed
//! one [`WorkGroup`] at a time together with the captured [`KernelArgs`];
//! groups of one dispatch run concurrently on the device's compute units.

use super::memory::{DeviceMemory, Element};
use crate::dispatch::AccessMode;
use crate::driver::ArgKind;
use bytemuck::Pod;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// A failure raised from inside a kernel body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct KernelFault(pub String);

impl KernelFault {
    pub fn new<S: Into<String>>(msg: S) -> Self {
        Self(msg.into())
    }
}

/// A Rust implementation of a kernel entry point.
pub trait NativeKernel: Send + Sync + fmt::Debug {
    /// Entry point name as written after `__kernel void`.
    fn name(&self) -> &str;

    /// Parameter kinds the source declaration must match.
    fn arg_kinds(&self) -> Vec<ArgKind>;

    fn run_group(&self, group: &WorkGroup, args: &KernelArgs) -> Result<(), KernelFault>;
}

/// One work-group of an NDRange. Unused dimensions have extent 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkGroup {
    group_id: [usize; 3],
    local_size: [usize; 3],
    global_size: [usize; 3],
    dims: usize,
}

impl WorkGroup {
    pub(crate) fn new(
        group_id: [usize; 3],
        local_size: [usize; 3],
        global_size: [usize; 3],
        dims: usize,
    ) -> Self {
        Self {
            group_id,
            local_size,
            global_size,
            dims,
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn group_id(&self, dim: usize) -> usize {
        self.group_id.get(dim).copied().unwrap_or(0)
    }

    pub fn local_size(&self, dim: usize) -> usize {
        self.local_size.get(dim).copied().unwrap_or(1)
    }

    pub fn global_size(&self, dim: usize) -> usize {
        self.global_size.get(dim).copied().unwrap_or(1)
    }

    pub fn num_groups(&self, dim: usize) -> usize {
        self.global_size(dim) / self.local_size(dim).max(1)
    }

    /// Work-items of the group, dimension 0 varying fastest.
    pub fn items(&self) -> impl Iterator<Item = WorkItem> + '_ {
        let [lx, ly, lz] = self.local_size;
        (0..lz).flat_map(move |z| {
            (0..ly).flat_map(move |y| {
                (0..lx).map(move |x| {
                    let local = [x, y, z];
                    let mut global = [0; 3];
                    for d in 0..3 {
                        global[d] = self.group_id[d] * self.local_size[d] + local[d];
                    }
                    WorkItem { global, local }
                })
            })
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    global: [usize; 3],
    local: [usize; 3],
}

impl WorkItem {
    pub fn global_id(&self, dim: usize) -> usize {
        self.global.get(dim).copied().unwrap_or(0)
    }

    pub fn local_id(&self, dim: usize) -> usize {
        self.local.get(dim).copied().unwrap_or(0)
    }
}

/// An argument value resolved against device memory.
#[derive(Debug, Clone)]
pub(crate) enum ArgValue {
    Mem(Arc<DeviceMemory>),
    Local(usize),
    Scalar(Vec<u8>),
}

/// Arguments of one dispatch, captured when it was enqueued.
#[derive(Debug, Clone)]
pub struct KernelArgs {
    values: Vec<ArgValue>,
}

impl KernelArgs {
    pub(crate) fn new(values: Vec<ArgValue>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn value(&self, index: usize) -> Result<&ArgValue, KernelFault> {
        self.values
            .get(index)
            .ok_or_else(|| KernelFault(format!("argument {} does not exist", index)))
    }

    fn memory(&self, index: usize) -> Result<&DeviceMemory, KernelFault> {
        match self.value(index)? {
            ArgValue::Mem(mem) => Ok(mem),
            _ => Err(KernelFault(format!("argument {} is not a buffer", index))),
        }
    }

    /// Read access to a global or constant buffer argument.
    pub fn global<T: Element>(&self, index: usize) -> Result<GlobalView<'_, T>, KernelFault> {
        Ok(GlobalView {
            mem: self.memory(index)?,
            arg: index,
            writable: false,
            _marker: PhantomData,
        })
    }

    /// Read/write access to a buffer argument. Buffers the host declared
    /// read-only from the device's perspective are refused.
    pub fn global_mut<T: Element>(&self, index: usize) -> Result<GlobalView<'_, T>, KernelFault> {
        let mem = self.memory(index)?;
        if mem.access() == AccessMode::ReadOnly {
            return Err(KernelFault(format!(
                "argument {} is a read-only buffer",
                index
            )));
        }
        Ok(GlobalView {
            mem,
            arg: index,
            writable: true,
            _marker: PhantomData,
        })
    }

    pub fn scalar<T: Pod>(&self, index: usize) -> Result<T, KernelFault> {
        match self.value(index)? {
            ArgValue::Scalar(bytes) if bytes.len() == std::mem::size_of::<T>() => {
                Ok(bytemuck::pod_read_unaligned(bytes))
            }
            ArgValue::Scalar(bytes) => Err(KernelFault(format!(
                "argument {} holds {} bytes, read as {} bytes",
                index,
                bytes.len(),
                std::mem::size_of::<T>()
            ))),
            _ => Err(KernelFault(format!("argument {} is not a scalar", index))),
        }
    }

    /// Size in bytes of a `__local` argument.
    pub fn local_len(&self, index: usize) -> Result<usize, KernelFault> {
        match self.value(index)? {
            ArgValue::Local(len) => Ok(*len),
            _ => Err(KernelFault(format!(
                "argument {} is not local memory",
                index
            ))),
        }
    }
}

/// Typed element access to a buffer argument.
pub struct GlobalView<'a, T: Element> {
    mem: &'a DeviceMemory,
    arg: usize,
    writable: bool,
    _marker: PhantomData<T>,
}

impl<'a, T: Element> GlobalView<'a, T> {
    pub fn len(&self) -> usize {
        self.mem.elements::<T>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Result<T, KernelFault> {
        self.mem.get(index).ok_or_else(|| self.out_of_bounds(index))
    }

    pub fn set(&self, index: usize, value: T) -> Result<(), KernelFault> {
        if !self.writable {
            return Err(KernelFault(format!(
                "argument {} was not opened for writing",
                self.arg
            )));
        }
        if self.mem.set(index, value) {
            Ok(())
        } else {
            Err(self.out_of_bounds(index))
        }
    }

    fn out_of_bounds(&self, index: usize) -> KernelFault {
        KernelFault(format!(
            "argument {}: {} index {} out of bounds ({} elements)",
            self.arg,
            T::TYPE_NAME,
            index,
            self.len()
        ))
    }
}

impl<T: Element> fmt::Debug for GlobalView<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GlobalView")
            .field("arg", &self.arg)
            .field("element", &T::TYPE_NAME)
            .field("len", &self.len())
            .field("writable", &self.writable)
            .finish()
    }
}

/// Native kernels available to a host driver, by entry point name.
#[derive(Debug, Clone, Default)]
pub struct NativeLibrary {
    kernels: HashMap<String, Arc<dyn NativeKernel>>,
}

impl NativeLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// The kernels used by the bundled programs.
    pub fn builtin() -> Self {
        let mut library = Self::new();
        library.register(Arc::new(TrigTable));
        library.register(Arc::new(HelloOpenCl));
        library.register(Arc::new(Saxpy));
        library.register(Arc::new(MatrixMultiply));
        library
    }

    /// Adds a kernel, replacing any previous kernel of the same name.
    pub fn register(&mut self, kernel: Arc<dyn NativeKernel>) {
        self.kernels.insert(kernel.name().to_string(), kernel);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn NativeKernel>> {
        self.kernels.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.kernels.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// `C[2i] = cos(A[i])`, `C[2i+1] = sin(B[i])`.
#[derive(Debug)]
struct TrigTable;

impl NativeKernel for TrigTable {
    fn name(&self) -> &str {
        "trigTable"
    }

    fn arg_kinds(&self) -> Vec<ArgKind> {
        vec![ArgKind::GlobalBuffer; 3]
    }

    fn run_group(&self, group: &WorkGroup, args: &KernelArgs) -> Result<(), KernelFault> {
        let a = args.global::<f32>(0)?;
        let b = args.global::<f32>(1)?;
        let c = args.global_mut::<f32>(2)?;

        for item in group.items() {
            let i = item.global_id(0);
            c.set(2 * i, a.get(i)?.cos())?;
            c.set(2 * i + 1, b.get(i)?.sin())?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct HelloOpenCl;

impl NativeKernel for HelloOpenCl {
    fn name(&self) -> &str {
        "helloOpenCL"
    }

    fn arg_kinds(&self) -> Vec<ArgKind> {
        Vec::new()
    }

    fn run_group(&self, group: &WorkGroup, _args: &KernelArgs) -> Result<(), KernelFault> {
        let ids: Vec<usize> = (0..group.dims()).map(|d| group.group_id(d)).collect();
        let items = group.items().count();
        tracing::debug!(group = ?ids, items, "hello from work-group");
        Ok(())
    }
}

/// `Z[i] = a * X[i] + Y[i]` for `i < n`.
#[derive(Debug)]
struct Saxpy;

impl NativeKernel for Saxpy {
    fn name(&self) -> &str {
        "saxpy"
    }

    fn arg_kinds(&self) -> Vec<ArgKind> {
        vec![
            ArgKind::Scalar { size: 4 },
            ArgKind::GlobalBuffer,
            ArgKind::GlobalBuffer,
            ArgKind::Scalar { size: 4 },
            ArgKind::GlobalBuffer,
        ]
    }

    fn run_group(&self, group: &WorkGroup, args: &KernelArgs) -> Result<(), KernelFault> {
        let a: f32 = args.scalar(0)?;
        let x = args.global::<f32>(1)?;
        let y = args.global::<f32>(2)?;
        let n: i32 = args.scalar(3)?;
        let z = args.global_mut::<f32>(4)?;

        for item in group.items() {
            let i = item.global_id(0);
            if (i as i64) < i64::from(n) {
                z.set(i, a * x.get(i)? + y.get(i)?)?;
            }
        }
        Ok(())
    }
}

/// Row-major `C = A * B` on `N x N` doubles; dimension 0 is the row.
#[derive(Debug)]
struct MatrixMultiply;

impl NativeKernel for MatrixMultiply {
    fn name(&self) -> &str {
        "matrixMultiply"
    }

    fn arg_kinds(&self) -> Vec<ArgKind> {
        vec![
            ArgKind::GlobalBuffer,
            ArgKind::GlobalBuffer,
            ArgKind::GlobalBuffer,
            ArgKind::Scalar { size: 4 },
        ]
    }

    fn run_group(&self, group: &WorkGroup, args: &KernelArgs) -> Result<(), KernelFault> {
        let a = args.global::<f64>(0)?;
        let b = args.global::<f64>(1)?;
        let c = args.global_mut::<f64>(2)?;
        let n: i32 = args.scalar(3)?;
        let n = usize::try_from(n).map_err(|_| KernelFault::new("N must not be negative"))?;

        for item in group.items() {
            let (row, col) = (item.global_id(0), item.global_id(1));
            if row >= n || col >= n {
                continue;
            }
            let mut sum = 0.0;
            for k in 0..n {
                sum += a.get(row * n + k)? * b.get(k * n + col)?;
            }
            c.set(row * n + col, sum)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_of<T: Element + Pod>(values: &[T], access: AccessMode) -> ArgValue {
        let bytes: &[u8] = bytemuck::cast_slice(values);
        let mem = DeviceMemory::new(bytes.len(), access);
        assert!(mem.write(0, bytes));
        ArgValue::Mem(Arc::new(mem))
    }

    fn whole_range(global: usize) -> WorkGroup {
        WorkGroup::new([0, 0, 0], [global, 1, 1], [global, 1, 1], 1)
    }

    #[test]
    fn test_items_cover_group() {
        let group = WorkGroup::new([1, 2, 0], [4, 2, 1], [8, 6, 1], 2);
        let items: Vec<WorkItem> = group.items().collect();
        assert_eq!(items.len(), 8);
        assert_eq!(items[0].global_id(0), 4);
        assert_eq!(items[0].global_id(1), 4);
        assert_eq!(items[7].local_id(0), 3);
        assert_eq!(items[7].global_id(1), 5);
        assert_eq!(group.num_groups(1), 3);
    }

    #[test]
    fn test_saxpy_respects_bound() {
        let args = KernelArgs::new(vec![
            ArgValue::Scalar(2.0f32.to_ne_bytes().to_vec()),
            buffer_of(&[1.0f32, 2.0, 3.0, 4.0], AccessMode::ReadOnly),
            buffer_of(&[10.0f32; 4], AccessMode::ReadOnly),
            ArgValue::Scalar(3i32.to_ne_bytes().to_vec()),
            buffer_of(&[0.0f32; 4], AccessMode::WriteOnly),
        ]);

        Saxpy.run_group(&whole_range(4), &args).unwrap();

        let z = args.global::<f32>(4).unwrap();
        assert_eq!(z.get(0).unwrap(), 12.0);
        assert_eq!(z.get(2).unwrap(), 16.0);
        assert_eq!(z.get(3).unwrap(), 0.0);
    }

    #[test]
    fn test_read_only_buffer_cannot_be_written() {
        let args = KernelArgs::new(vec![buffer_of(&[0u32; 2], AccessMode::ReadOnly)]);
        assert!(args.global_mut::<u32>(0).is_err());
        assert!(args.global::<u32>(0).unwrap().set(0, 1).is_err());
    }

    #[test]
    fn test_out_of_bounds_is_a_fault() {
        let args = KernelArgs::new(vec![
            buffer_of(&[0.5f32; 2], AccessMode::ReadOnly),
            buffer_of(&[0.5f32; 2], AccessMode::ReadOnly),
            buffer_of(&[0.0f32; 4], AccessMode::WriteOnly),
        ]);
        let err = TrigTable.run_group(&whole_range(4), &args).unwrap_err();
        assert!(err.0.contains("out of bounds"));
    }

    #[test]
    fn test_scalar_size_must_match() {
        let args = KernelArgs::new(vec![ArgValue::Scalar(vec![0; 8])]);
        assert!(args.scalar::<i32>(0).is_err());
        assert_eq!(args.scalar::<f64>(0).unwrap(), 0.0);
        assert!(args.local_len(0).is_err());
    }

    #[test]
    fn test_builtin_names() {
        let library = NativeLibrary::builtin();
        assert_eq!(
            library.names(),
            vec!["helloOpenCL", "matrixMultiply", "saxpy", "trigTable"]
        );
    }
}
