//! Command line and start-up shared by the demo programs.

#![allow(dead_code)]

use clap::Parser;
use kerna_rs::prelude::*;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
pub struct DemoArgs {
    /// Report every runtime step, not only failing ones (`-debug` also works)
    #[arg(long)]
    pub debug: bool,

    /// Consider devices of every kind
    #[arg(short = 'a', conflicts_with_all = ["cpu", "gpu"])]
    pub all: bool,

    /// Consider CPU devices only
    #[arg(short = 'c', conflicts_with = "gpu")]
    pub cpu: bool,

    /// Consider GPU devices only
    #[arg(short = 'g')]
    pub gpu: bool,

    /// Use the installed OpenCL platforms instead of the host platform
    #[arg(long)]
    pub opencl: bool,

    /// Directory holding the `.cl` sources
    #[arg(long, value_name = "DIR", default_value = "kernels")]
    pub kernel_dir: PathBuf,

    /// Demo-specific size (dimensions, vector length or matrix order)
    pub number: Option<usize>,
}

impl DemoArgs {
    /// Parses the process arguments, accepting the single-dash `-debug`.
    pub fn from_env() -> Self {
        let args = std::env::args().map(|arg| {
            if arg == "-debug" {
                "--debug".to_string()
            } else {
                arg
            }
        });
        Self::parse_from(args)
    }

    pub fn filter(&self) -> DeviceFilter {
        if self.all {
            DeviceFilter::All
        } else if self.cpu {
            DeviceFilter::Cpu
        } else if self.gpu {
            DeviceFilter::Gpu
        } else {
            DeviceFilter::Default
        }
    }

    pub fn config(&self) -> Config {
        let config = Config::builder().device_filter(self.filter()).build();
        check("configure", config)
    }

    pub fn kernel_path(&self, file: &str) -> PathBuf {
        self.kernel_dir.join(file)
    }
}

pub fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .try_init();
}

/// Unwraps `result`, or reports the failing step and exits with status 1.
pub fn check<T>(step: &str, result: Result<T>) -> T {
    match result {
        Ok(value) => value,
        Err(err) => {
            println!("Step {}, status = {}", step, err.status());
            if let Some(build) = err.build_log() {
                for entry in build.failed_devices() {
                    println!("LOG:\n{}\n", entry.log);
                }
            } else {
                eprintln!("{}", err);
            }
            std::process::exit(1);
        }
    }
}

/// Discovers platforms, prints the first platform's version and picks it.
pub fn prolog(args: &DemoArgs, config: &Config) -> (DeviceCatalog, Platform) {
    let catalog = if args.opencl {
        open_cl_catalog().map(|c| c.with_filter(config.device_filter))
    } else {
        DeviceCatalog::host(config)
    };
    let catalog = check("clGetPlatformIDs", catalog);

    let platforms = catalog.platforms();
    let platform = platforms[0].clone();
    println!("{}", platform.version());
    if platforms.len() > 1 {
        println!(
            "Found {} platforms. Arbitrarily using: {}",
            platforms.len(),
            platform.name()
        );
    }
    (catalog, platform)
}

#[cfg(feature = "opencl")]
fn open_cl_catalog() -> Result<DeviceCatalog> {
    DeviceCatalog::opencl()
}

#[cfg(not(feature = "opencl"))]
fn open_cl_catalog() -> Result<DeviceCatalog> {
    Err(Error::config("built without the `opencl` feature"))
}

pub fn read_kernel(path: &Path) -> String {
    check("readSource", load_source(path))
}
