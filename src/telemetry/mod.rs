//! Runtime counters and their export.
//!
//! Every context carries one [`Metrics`] instance shared with its queues,
//! buffers and programs. With the `telemetry` feature disabled the same API
//! exists as a no-op.

#[cfg(feature = "telemetry")]
pub mod metrics;

#[cfg(feature = "telemetry")]
pub mod export;

#[cfg(feature = "telemetry")]
pub use metrics::{Metrics, MetricsSnapshot};

#[cfg(feature = "telemetry")]
pub use export::{ConsoleExporter, JsonExporter, MetricsExporter};

// Stub implementations when telemetry is disabled
#[cfg(not(feature = "telemetry"))]
pub mod metrics {
    #[derive(Debug, Clone, Default)]
    pub struct Metrics;

    impl Metrics {
        pub fn new() -> Self {
            Self
        }
        pub fn record_dispatch(&self, _: u64) {}
        pub fn record_execution_failure(&self) {}
        pub fn record_upload(&self, _: usize) {}
        pub fn record_download(&self, _: usize) {}
        pub fn record_build(&self, _: bool) {}
        pub fn record_cache_hit(&self) {}
        pub fn record_allocation(&self, _: u64) {}
        pub fn record_release(&self, _: u64) {}
        pub fn record_latency(&self, _: u64) {}
        pub fn snapshot(&self) -> MetricsSnapshot {
            MetricsSnapshot::default()
        }
        pub fn reset(&self) {}
    }

    #[derive(Debug, Clone, Default)]
    pub struct MetricsSnapshot {
        pub dispatches: u64,
        pub work_items: u64,
        pub execution_failures: u64,
        pub bytes_uploaded: u64,
        pub bytes_downloaded: u64,
        pub builds: u64,
        pub build_failures: u64,
        pub cache_hits: u64,
        pub bytes_allocated: u64,
    }
}

#[cfg(not(feature = "telemetry"))]
pub use metrics::{Metrics, MetricsSnapshot};
