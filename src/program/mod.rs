//! Program Cache: builds kernel source for a set of devices and hands out
//! kernels from the result.
//!
//! Identical `(context, source, devices)` builds are memoized. A cached
//! program is handed out again only while it and its context are alive.

pub mod kernel;

pub use kernel::{BoundArg, Kernel, KernelArg, LocalMemory};

use crate::catalog::Device;
use crate::config::Config;
use crate::context::{Context, ContextInner};
use crate::driver::{ContextHandle, DeviceId, KernelSignature, ProgramHandle};
use crate::error::{checked, Error, Result};
use kernel::KernelInner;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Reads a UTF-8 kernel source file.
pub fn load_source<P: AsRef<Path>>(path: P) -> Result<String> {
    let path = path.as_ref();
    let source = checked(
        "loadProgramSource",
        std::fs::read_to_string(path).map_err(Error::from),
    )?;
    tracing::debug!(path = %path.display(), bytes = source.len(), "kernel source loaded");
    Ok(source)
}

pub(crate) struct ProgramInner {
    pub ctx: Arc<ContextInner>,
    pub handle: ProgramHandle,
    pub devices: Vec<Device>,
    pub kernels: Vec<KernelSignature>,
    released: AtomicBool,
}

impl ProgramInner {
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub fn ensure_live(&self) -> Result<()> {
        self.ctx.ensure_open("program")?;
        if self.is_released() {
            return Err(Error::UseAfterClose { resource: "program" });
        }
        Ok(())
    }

    pub fn release(&self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.ctx.driver.release_program(self.handle);
        }
    }
}

impl Drop for ProgramInner {
    fn drop(&mut self) {
        self.release();
    }
}

/// A program built for a subset of one context's devices.
#[derive(Clone)]
pub struct Program {
    inner: Arc<ProgramInner>,
}

impl Program {
    /// Creates a kernel object for entry point `name`.
    pub fn kernel(&self, name: &str) -> Result<Kernel> {
        checked("clCreateKernel", self.kernel_inner(name))
    }

    fn kernel_inner(&self, name: &str) -> Result<Kernel> {
        self.inner.ensure_live()?;
        let signature = self
            .inner
            .kernels
            .iter()
            .find(|k| k.name == name)
            .cloned()
            .ok_or_else(|| Error::KernelNotFound {
                name: name.to_string(),
            })?;

        let handle = self.inner.ctx.driver.create_kernel(self.inner.handle, name)?;
        Ok(Kernel::new(KernelInner::new(
            self.inner.clone(),
            handle,
            signature,
        )))
    }

    /// Entry points in source order.
    pub fn kernel_names(&self) -> Vec<&str> {
        self.inner.kernels.iter().map(|k| k.name.as_str()).collect()
    }

    pub fn signatures(&self) -> &[KernelSignature] {
        &self.inner.kernels
    }

    /// Devices the program was built for.
    pub fn devices(&self) -> &[Device] {
        &self.inner.devices
    }

    pub fn is_released(&self) -> bool {
        self.inner.ensure_live().is_err()
    }

    /// Releases the program and invalidates its kernels. Idempotent.
    pub fn release(&self) {
        self.inner.release();
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("handle", &self.inner.handle)
            .field("kernels", &self.kernel_names())
            .field("devices", &self.inner.devices.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

type CacheKey = (ContextHandle, String, Vec<DeviceId>);

/// Builds programs and memoizes successful builds.
pub struct ProgramCache {
    enabled: bool,
    entries: Mutex<HashMap<CacheKey, Program>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ProgramCache {
    pub fn new(config: &Config) -> Self {
        Self::with_caching(config.cache_programs)
    }

    fn with_caching(enabled: bool) -> Self {
        Self {
            enabled,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Builds `source` for `devices` of `context`; an empty slice means every
    /// device of the context. A failed build is not cached and carries the
    /// log of every targeted device.
    pub fn build(&self, context: &Context, source: &str, devices: &[Device]) -> Result<Program> {
        checked("clBuildProgram", self.build_inner(context, source, devices))
    }

    fn build_inner(&self, context: &Context, source: &str, devices: &[Device]) -> Result<Program> {
        let ctx = context.inner();
        ctx.ensure_open("context")?;

        let targets: Vec<Device> = if devices.is_empty() {
            ctx.devices.clone()
        } else {
            let mut targets: Vec<Device> = Vec::with_capacity(devices.len());
            for device in devices {
                if !ctx.contains(device.id()) {
                    return Err(Error::DeviceNotInContext {
                        device: device.id(),
                    });
                }
                if !targets.contains(device) {
                    targets.push(device.clone());
                }
            }
            targets
        };

        let mut ids: Vec<DeviceId> = targets.iter().map(Device::id).collect();
        ids.sort_unstable();
        let key = (ctx.handle, source.to_string(), ids.clone());

        if self.enabled {
            let mut entries = self.entries.lock();
            entries.retain(|_, p| !p.is_released());
            if let Some(program) = entries.get(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                ctx.metrics.record_cache_hit();
                tracing::debug!(kernels = ?program.kernel_names(), "program cache hit");
                return Ok(program.clone());
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let outcome = ctx.driver.build_program(ctx.handle, source, &ids);
        ctx.metrics.record_build(outcome.is_ok());
        let handle = outcome?;

        let kernels = match ctx.driver.kernel_signatures(handle) {
            Ok(kernels) => kernels,
            Err(err) => {
                ctx.driver.release_program(handle);
                return Err(err);
            }
        };

        let inner = Arc::new(ProgramInner {
            ctx: ctx.clone(),
            handle,
            devices: targets,
            kernels,
            released: AtomicBool::new(false),
        });
        ctx.track_program(&inner);
        let program = Program { inner };

        if self.enabled {
            self.entries.lock().insert(key, program.clone());
        }
        Ok(program)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Drops every cached program. Programs still held elsewhere stay valid.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProgramCache {
    fn default() -> Self {
        Self::with_caching(true)
    }
}

impl fmt::Debug for ProgramCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgramCache")
            .field("enabled", &self.enabled)
            .field("entries", &self.len())
            .field("stats", &self.stats())
            .finish()
    }
}
