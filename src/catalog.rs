//! Device Catalog: platform discovery and device enumeration.
//!
//! A catalog is a snapshot taken once per [`DeviceCatalog::discover`] call
//! and kept for as long as the value lives; nothing is cached in process
//! globals.

use crate::config::Config;
use crate::driver::{DeviceId, DeviceInfo, DeviceKind, Driver, HostDriver, PlatformId, PlatformInfo};
use crate::error::{checked, Error, Result};
use std::fmt;
use std::sync::Arc;

/// Device category requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceFilter {
    /// The platform's default device.
    #[default]
    Default,
    Cpu,
    Gpu,
    Accelerator,
    All,
}

impl DeviceFilter {
    fn matches_kind(&self, kind: DeviceKind) -> bool {
        match self {
            DeviceFilter::Default | DeviceFilter::All => true,
            DeviceFilter::Cpu => kind == DeviceKind::Cpu,
            DeviceFilter::Gpu => kind == DeviceKind::Gpu,
            DeviceFilter::Accelerator => kind == DeviceKind::Accelerator,
        }
    }
}

impl fmt::Display for DeviceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceFilter::Default => write!(f, "default"),
            DeviceFilter::Cpu => write!(f, "CPU"),
            DeviceFilter::Gpu => write!(f, "GPU"),
            DeviceFilter::Accelerator => write!(f, "accelerator"),
            DeviceFilter::All => write!(f, "any"),
        }
    }
}

/// Optional device features, detected from the extension list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    DoublePrecision,
    HalfPrecision,
    GlobalInt32Atomics,
}

impl Capability {
    pub fn extension(&self) -> &'static str {
        match self {
            Capability::DoublePrecision => "cl_khr_fp64",
            Capability::HalfPrecision => "cl_khr_fp16",
            Capability::GlobalInt32Atomics => "cl_khr_global_int32_base_atomics",
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Platform {
    info: Arc<PlatformInfo>,
}

impl Platform {
    pub fn id(&self) -> PlatformId {
        self.info.id
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn vendor(&self) -> &str {
        &self.info.vendor
    }

    pub fn version(&self) -> &str {
        &self.info.version
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("id", &self.info.id.0)
            .field("name", &self.info.name)
            .finish()
    }
}

/// A device as discovered. Immutable; clones share the same record.
#[derive(Clone, PartialEq, Eq)]
pub struct Device {
    info: Arc<DeviceInfo>,
}

impl Device {
    pub fn id(&self) -> DeviceId {
        self.info.id
    }

    pub fn platform(&self) -> PlatformId {
        self.info.platform
    }

    pub fn kind(&self) -> DeviceKind {
        self.info.kind
    }

    pub fn is_default(&self) -> bool {
        self.info.is_default
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn vendor(&self) -> &str {
        &self.info.vendor
    }

    pub fn extensions(&self) -> &[String] {
        &self.info.extensions
    }

    pub fn max_work_group_size(&self) -> usize {
        self.info.max_work_group_size
    }

    pub fn max_work_item_dimensions(&self) -> u32 {
        self.info.max_work_item_dimensions
    }

    pub fn supports(&self, capability: Capability) -> bool {
        let wanted = capability.extension();
        self.info.extensions.iter().any(|e| e == wanted)
    }

    pub fn limits(&self) -> DeviceLimits {
        DeviceLimits {
            global_mem_size: self.info.global_mem_size,
            local_mem_size: self.info.local_mem_size,
            max_mem_alloc_size: self.info.max_mem_alloc_size,
            max_work_group_size: self.info.max_work_group_size,
            max_compute_units: self.info.max_compute_units,
        }
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.info.id.0)
            .field("kind", &self.info.kind)
            .field("name", &self.info.name)
            .finish()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.info.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    pub global_mem_size: u64,
    pub local_mem_size: u64,
    pub max_mem_alloc_size: u64,
    pub max_work_group_size: usize,
    pub max_compute_units: u32,
}

impl fmt::Display for DeviceLimits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Device Global Memory Size: {}", self.global_mem_size)?;
        writeln!(f, "Device Local Memory Size: {}", self.local_mem_size)?;
        writeln!(f, "Device Max Allocation Size: {}", self.max_mem_alloc_size)?;
        writeln!(f, "Device Max Work Group Size: {}", self.max_work_group_size)?;
        write!(f, "Device Max Compute Units: {}", self.max_compute_units)
    }
}

/// Snapshot of every platform and device a driver exposes.
pub struct DeviceCatalog {
    driver: Arc<dyn Driver>,
    platforms: Vec<Platform>,
    devices: Vec<Device>,
    filter: DeviceFilter,
}

impl DeviceCatalog {
    pub fn discover(driver: Arc<dyn Driver>) -> Result<Self> {
        let infos = checked("clGetPlatformIDs", driver.platforms())?;
        if infos.is_empty() {
            return checked("clGetPlatformIDs", Err(Error::NoPlatform));
        }

        let mut platforms = Vec::with_capacity(infos.len());
        let mut devices = Vec::new();
        for info in infos {
            let found = checked("clGetDeviceIDs", driver.devices(info.id))?;
            devices.extend(found.into_iter().map(|d| Device { info: Arc::new(d) }));
            platforms.push(Platform {
                info: Arc::new(info),
            });
        }

        tracing::debug!(
            "{} driver: {} platform(s), {} device(s)",
            driver.name(),
            platforms.len(),
            devices.len()
        );

        Ok(Self {
            driver,
            platforms,
            devices,
            filter: DeviceFilter::Default,
        })
    }

    /// Catalog of the built-in host platform, preferring
    /// `config.device_filter`.
    pub fn host(config: &Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::discover(Arc::new(HostDriver::new(config)))?.with_filter(config.device_filter))
    }

    /// Sets the filter [`DeviceCatalog::preferred_devices`] applies.
    pub fn with_filter(mut self, filter: DeviceFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn filter(&self) -> DeviceFilter {
        self.filter
    }

    /// Catalog of the installed OpenCL platforms.
    #[cfg(feature = "opencl")]
    pub fn opencl() -> Result<Self> {
        Self::discover(Arc::new(crate::driver::OpenClDriver::new()?))
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn platforms(&self) -> &[Platform] {
        &self.platforms
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.iter().find(|d| d.id() == id)
    }

    /// Devices of `platform` matching `filter`, in discovery order.
    /// `Default` yields a single device: the one flagged default, else the
    /// first one.
    pub fn list_devices(&self, platform: &Platform, filter: DeviceFilter) -> Result<Vec<Device>> {
        let on_platform = self.devices.iter().filter(|d| d.platform() == platform.id());

        let found: Vec<Device> = match filter {
            DeviceFilter::Default => {
                let all: Vec<&Device> = on_platform.collect();
                all.iter()
                    .find(|d| d.is_default())
                    .or_else(|| all.first())
                    .map(|d| vec![(*d).clone()])
                    .unwrap_or_default()
            }
            _ => on_platform
                .filter(|d| filter.matches_kind(d.kind()))
                .cloned()
                .collect(),
        };

        if found.is_empty() {
            return checked(
                "clGetDeviceIDs",
                Err(Error::NoDevice {
                    platform: platform.name().to_string(),
                    filter: filter.to_string(),
                }),
            );
        }
        Ok(found)
    }

    /// Devices of `platform` matching the catalog's filter.
    pub fn preferred_devices(&self, platform: &Platform) -> Result<Vec<Device>> {
        self.list_devices(platform, self.filter)
    }

    pub fn query_limits(&self, device: &Device) -> DeviceLimits {
        device.limits()
    }

    /// Devices across all platforms that match `filter` and `predicate`.
    pub fn find_devices<P>(&self, filter: DeviceFilter, predicate: P) -> Vec<Device>
    where
        P: Fn(&Device) -> bool,
    {
        let mut found = Vec::new();
        for platform in &self.platforms {
            if let Ok(devices) = self.list_devices(platform, filter) {
                found.extend(devices.into_iter().filter(|d| predicate(d)));
            }
        }
        found
    }
}

impl fmt::Debug for DeviceCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCatalog")
            .field("driver", &self.driver.name())
            .field("platforms", &self.platforms)
            .field("devices", &self.devices)
            .field("filter", &self.filter)
            .finish()
    }
}
