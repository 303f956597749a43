use crate::driver::DeviceId;
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no compute platform found")]
    NoPlatform,

    #[error("no {filter} device found on platform '{platform}'")]
    NoDevice { platform: String, filter: String },

    #[error("context creation failed: {0}")]
    ContextCreation(String),

    #[error("device {device} is not part of this context")]
    DeviceNotInContext { device: DeviceId },

    #[error("{resource} used after it was released or its context was closed")]
    UseAfterClose { resource: &'static str },

    #[error("{resource} belongs to a different context")]
    ContextMismatch { resource: &'static str },

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("kernel '{name}' not found in program")]
    KernelNotFound { name: String },

    #[error("argument index {index} out of range (kernel takes {count} arguments)")]
    InvalidArgumentIndex { index: usize, count: usize },

    #[error("argument {index}: expected {expected}, found {found}")]
    ArgumentTypeMismatch {
        index: usize,
        expected: String,
        found: String,
    },

    #[error("kernel '{kernel}': argument {index} is not bound")]
    UnboundArgument { kernel: String, index: usize },

    #[error("invalid work size: {0}")]
    InvalidWorkSize(String),

    #[error("cannot allocate {requested} bytes ({available} bytes available)")]
    Allocation { requested: u64, available: u64 },

    #[error("transfer error: {0}")]
    Transfer(String),

    #[error("kernel '{kernel}' failed: {message}")]
    Execution { kernel: String, message: String },

    #[error("device selection failed: {0}")]
    Selection(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("{call} returned status {status}")]
    Driver { call: &'static str, status: i32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    pub fn context_creation<S: Into<String>>(msg: S) -> Self {
        Error::ContextCreation(msg.into())
    }

    pub fn work_size<S: Into<String>>(msg: S) -> Self {
        Error::InvalidWorkSize(msg.into())
    }

    pub fn transfer<S: Into<String>>(msg: S) -> Self {
        Error::Transfer(msg.into())
    }

    pub fn selection<S: Into<String>>(msg: S) -> Self {
        Error::Selection(msg.into())
    }

    /// Numeric status in the style of the compute API's error codes.
    pub fn status(&self) -> i32 {
        match self {
            Error::NoPlatform => -1001,
            Error::NoDevice { .. } => -1,
            Error::ContextCreation(_) => -34,
            Error::DeviceNotInContext { .. } => -33,
            Error::UseAfterClose { .. } => -34,
            Error::ContextMismatch { .. } => -34,
            Error::Build(_) => -11,
            Error::KernelNotFound { .. } => -46,
            Error::InvalidArgumentIndex { .. } => -49,
            Error::ArgumentTypeMismatch { .. } => -51,
            Error::UnboundArgument { .. } => -52,
            Error::InvalidWorkSize(_) => -54,
            Error::Allocation { .. } => -4,
            Error::Transfer(_) => -30,
            Error::Execution { .. } => -5,
            Error::Selection(_) => -1,
            Error::Config(_) => -30,
            Error::Driver { status, .. } => *status,
            Error::Io(_) => -30,
        }
    }

    /// The compute API call this kind of failure is normally reported by.
    pub fn step(&self) -> &'static str {
        match self {
            Error::NoPlatform => "clGetPlatformIDs",
            Error::NoDevice { .. } => "clGetDeviceIDs",
            Error::ContextCreation(_) => "clCreateContext",
            Error::DeviceNotInContext { .. } => "clCreateCommandQueue",
            Error::UseAfterClose { .. } | Error::ContextMismatch { .. } => "clRetainContext",
            Error::Build(_) => "clBuildProgram",
            Error::KernelNotFound { .. } => "clCreateKernel",
            Error::InvalidArgumentIndex { .. } | Error::ArgumentTypeMismatch { .. } => {
                "clSetKernelArg"
            }
            Error::UnboundArgument { .. } | Error::InvalidWorkSize(_) => "clEnqueueNDRangeKernel",
            Error::Allocation { .. } => "clCreateBuffer",
            Error::Transfer(_) => "clEnqueueWriteBuffer",
            Error::Execution { .. } => "clWaitForEvents",
            Error::Selection(_) => "selectDevice",
            Error::Config(_) => "configure",
            Error::Driver { call, .. } => call,
            Error::Io(_) => "loadProgramSource",
        }
    }

    /// An equal error for reporting the same failure more than once.
    /// `Io` keeps its kind and message only.
    pub fn replicate(&self) -> Error {
        match self {
            Error::NoPlatform => Error::NoPlatform,
            Error::NoDevice { platform, filter } => Error::NoDevice {
                platform: platform.clone(),
                filter: filter.clone(),
            },
            Error::ContextCreation(msg) => Error::ContextCreation(msg.clone()),
            Error::DeviceNotInContext { device } => Error::DeviceNotInContext { device: *device },
            Error::UseAfterClose { resource } => Error::UseAfterClose {
                resource: *resource,
            },
            Error::ContextMismatch { resource } => Error::ContextMismatch {
                resource: *resource,
            },
            Error::Build(err) => Error::Build(err.clone()),
            Error::KernelNotFound { name } => Error::KernelNotFound { name: name.clone() },
            Error::InvalidArgumentIndex { index, count } => Error::InvalidArgumentIndex {
                index: *index,
                count: *count,
            },
            Error::ArgumentTypeMismatch {
                index,
                expected,
                found,
            } => Error::ArgumentTypeMismatch {
                index: *index,
                expected: expected.clone(),
                found: found.clone(),
            },
            Error::UnboundArgument { kernel, index } => Error::UnboundArgument {
                kernel: kernel.clone(),
                index: *index,
            },
            Error::InvalidWorkSize(msg) => Error::InvalidWorkSize(msg.clone()),
            Error::Allocation {
                requested,
                available,
            } => Error::Allocation {
                requested: *requested,
                available: *available,
            },
            Error::Transfer(msg) => Error::Transfer(msg.clone()),
            Error::Execution { kernel, message } => Error::Execution {
                kernel: kernel.clone(),
                message: message.clone(),
            },
            Error::Selection(msg) => Error::Selection(msg.clone()),
            Error::Config(msg) => Error::Config(msg.clone()),
            Error::Driver { call, status } => Error::Driver {
                call: *call,
                status: *status,
            },
            Error::Io(err) => Error::Io(std::io::Error::new(err.kind(), err.to_string())),
        }
    }

    /// Build diagnostics, when this is a build failure.
    pub fn build_log(&self) -> Option<&BuildError> {
        match self {
            Error::Build(err) => Some(err),
            _ => None,
        }
    }
}

/// Compiler output for one device of a failed build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceBuildLog {
    pub device: DeviceId,
    pub device_name: String,
    pub succeeded: bool,
    pub log: String,
}

/// A program build that failed on at least one device.
///
/// Carries the log of every device the build targeted, because the log is
/// the only actionable information a caller gets from a failed build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildError {
    pub logs: Vec<DeviceBuildLog>,
}

impl BuildError {
    pub fn new(logs: Vec<DeviceBuildLog>) -> Self {
        Self { logs }
    }

    pub fn failed_devices(&self) -> impl Iterator<Item = &DeviceBuildLog> {
        self.logs.iter().filter(|l| !l.succeeded)
    }

    pub fn log_for(&self, device: DeviceId) -> Option<&str> {
        self.logs
            .iter()
            .find(|l| l.device == device)
            .map(|l| l.log.as_str())
    }
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed = self.failed_devices().count();
        write!(f, "program build failed on {} device(s)", failed)?;
        for entry in self.failed_devices() {
            write!(f, "\n[{}] {}:\n{}", entry.device, entry.device_name, entry.log)?;
        }
        Ok(())
    }
}

impl std::error::Error for BuildError {}

/// Log the outcome of one runtime step the way the status-checking helpers
/// of the classic host programs do: `status = 0` at debug level, failures
/// at warn level. The result is passed through untouched.
pub(crate) fn checked<T>(step: &'static str, result: Result<T>) -> Result<T> {
    match &result {
        Ok(_) => tracing::debug!("Step {}, status = 0", step),
        Err(err) => tracing::warn!("Step {}, status = {}: {}", step, err.status(), err),
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_are_negative() {
        let errors = vec![
            Error::NoPlatform,
            Error::work_size("bad"),
            Error::transfer("bad"),
            Error::UnboundArgument {
                kernel: "k".into(),
                index: 0,
            },
        ];
        for err in errors {
            assert!(err.status() < 0, "{} should map to a failure status", err);
        }
    }

    #[test]
    fn test_step_labels() {
        assert_eq!(Error::NoPlatform.step(), "clGetPlatformIDs");
        assert_eq!(Error::work_size("bad").step(), "clEnqueueNDRangeKernel");
        let err = Error::Driver {
            call: "clFinish",
            status: -36,
        };
        assert_eq!(err.step(), "clFinish");
        assert_eq!(err.status(), -36);
    }

    #[test]
    fn test_replicate_keeps_variant_and_text() {
        let err = Error::Execution {
            kernel: "saxpy".into(),
            message: "index 12 out of bounds".into(),
        };
        let copy = err.replicate();
        assert!(matches!(copy, Error::Execution { ref kernel, .. } if kernel == "saxpy"));
        assert_eq!(copy.to_string(), err.to_string());

        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(matches!(io.replicate(), Error::Io(ref e) if e.kind() == std::io::ErrorKind::NotFound));
    }

    #[test]
    fn test_build_error_display_lists_failed_devices() {
        let err = BuildError::new(vec![
            DeviceBuildLog {
                device: DeviceId(0),
                device_name: "cpu".into(),
                succeeded: true,
                log: String::new(),
            },
            DeviceBuildLog {
                device: DeviceId(1),
                device_name: "gpu".into(),
                succeeded: false,
                log: "error: boom".into(),
            },
        ]);

        let text = err.to_string();
        assert!(text.contains("1 device(s)"));
        assert!(text.contains("error: boom"));
        assert!(!text.contains("cpu"));
        assert_eq!(err.log_for(DeviceId(1)), Some("error: boom"));
    }
}
