use crate::catalog::DeviceFilter;
use crate::error::{Error, Result};

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    /// Worker threads backing the host CPU device; `None` means one per core.
    pub compute_units: Option<usize>,
    pub device_filter: DeviceFilter,

    pub pin_workers: bool,
    pub stack_size: Option<usize>,
    pub thread_name_prefix: String,

    pub host_global_mem_size: u64,
    pub host_local_mem_size: u64,

    /// Memoize successful builds of identical source for the same devices.
    pub cache_programs: bool,
    /// Allow prompting on stdin when device selection is ambiguous.
    pub interactive: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            compute_units: None,
            device_filter: DeviceFilter::Default,

            pin_workers: false,
            stack_size: Some(2 * 1024 * 1024),
            thread_name_prefix: "kerna-cu".to_string(),

            host_global_mem_size: 1024 * MIB,
            host_local_mem_size: 32 * 1024,

            cache_programs: true,
            interactive: true,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(n) = self.compute_units {
            if n == 0 {
                return Err(Error::config("compute_units must be > 0"));
            }
            if n > 1024 {
                return Err(Error::config("compute_units too large (max 1024)"));
            }
        }

        if self.host_global_mem_size == 0 {
            return Err(Error::config("host_global_mem_size must be > 0"));
        }

        if self.host_local_mem_size == 0 || self.host_local_mem_size > self.host_global_mem_size
        {
            return Err(Error::config(
                "host_local_mem_size must be in (0, host_global_mem_size]",
            ));
        }

        if self.thread_name_prefix.is_empty() {
            return Err(Error::config("thread_name_prefix must not be empty"));
        }

        Ok(())
    }

    pub fn worker_threads(&self) -> usize {
        self.compute_units.unwrap_or_else(num_cpus::get)
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn compute_units(mut self, n: usize) -> Self {
        self.config.compute_units = Some(n);
        self
    }

    pub fn device_filter(mut self, filter: DeviceFilter) -> Self {
        self.config.device_filter = filter;
        self
    }

    pub fn pin_workers(mut self, pin: bool) -> Self {
        self.config.pin_workers = pin;
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn host_global_mem_size(mut self, bytes: u64) -> Self {
        self.config.host_global_mem_size = bytes;
        self
    }

    pub fn host_local_mem_size(mut self, bytes: u64) -> Self {
        self.config.host_local_mem_size = bytes;
        self
    }

    pub fn cache_programs(mut self, enable: bool) -> Self {
        self.config.cache_programs = enable;
        self
    }

    pub fn interactive(mut self, enable: bool) -> Self {
        self.config.interactive = enable;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
        assert!(Config::default().worker_threads() >= 1);
    }

    #[test]
    fn test_builder_rejects_zero_compute_units() {
        let result = Config::builder().compute_units(0).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_rejects_local_larger_than_global() {
        let result = Config::builder()
            .host_global_mem_size(1024)
            .host_local_mem_size(4096)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_sets_fields() {
        let config = Config::builder()
            .compute_units(3)
            .device_filter(DeviceFilter::Gpu)
            .cache_programs(false)
            .interactive(false)
            .build()
            .unwrap();

        assert_eq!(config.worker_threads(), 3);
        assert_eq!(config.device_filter, DeviceFilter::Gpu);
        assert!(!config.cache_programs);
        assert!(!config.interactive);
    }
}
