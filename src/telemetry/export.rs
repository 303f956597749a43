//! Metrics export in JSON and human-readable form.

use super::metrics::MetricsSnapshot;
use crate::error::Result;

pub trait MetricsExporter: Send + Sync {
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<()>;
}

/// Writes a pretty-printed JSON document to a file.
#[derive(Debug)]
pub struct JsonExporter {
    output_path: std::path::PathBuf,
}

impl JsonExporter {
    pub fn new(output_path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
        }
    }
}

impl MetricsExporter for JsonExporter {
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        let serializable = SerializableSnapshot::from(snapshot);
        let json = serde_json::to_string_pretty(&serializable).map_err(std::io::Error::from)?;
        std::fs::write(&self.output_path, json)?;
        Ok(())
    }
}

#[derive(Debug, Clone, serde::Serialize)]
struct SerializableSnapshot {
    uptime_secs: f64,
    dispatches: u64,
    work_items: u64,
    execution_failures: u64,
    bytes_uploaded: u64,
    bytes_downloaded: u64,
    builds: u64,
    build_failures: u64,
    cache_hits: u64,
    cache_hit_ratio: f64,
    allocated_mb: f64,
    avg_latency_us: f64,
    p50_latency_us: f64,
    p99_latency_us: f64,
    max_latency_us: f64,
    work_items_per_second: f64,
}

impl From<&MetricsSnapshot> for SerializableSnapshot {
    fn from(snapshot: &MetricsSnapshot) -> Self {
        Self {
            uptime_secs: snapshot.uptime.as_secs_f64(),
            dispatches: snapshot.dispatches,
            work_items: snapshot.work_items,
            execution_failures: snapshot.execution_failures,
            bytes_uploaded: snapshot.bytes_uploaded,
            bytes_downloaded: snapshot.bytes_downloaded,
            builds: snapshot.builds,
            build_failures: snapshot.build_failures,
            cache_hits: snapshot.cache_hits,
            cache_hit_ratio: snapshot.cache_hit_ratio(),
            allocated_mb: snapshot.bytes_allocated as f64 / (1024.0 * 1024.0),
            avg_latency_us: snapshot.avg_latency_ns as f64 / 1_000.0,
            p50_latency_us: snapshot.p50_latency_ns as f64 / 1_000.0,
            p99_latency_us: snapshot.p99_latency_ns as f64 / 1_000.0,
            max_latency_us: snapshot.max_latency_ns as f64 / 1_000.0,
            work_items_per_second: snapshot.work_items_per_second(),
        }
    }
}

/// Prints a summary to stdout.
#[derive(Debug)]
pub struct ConsoleExporter {
    verbose: bool,
}

impl ConsoleExporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl MetricsExporter for ConsoleExporter {
    fn export(&self, snapshot: &MetricsSnapshot) -> Result<()> {
        println!("=== KERNA Runtime Metrics ===");
        println!("Uptime: {:.2}s", snapshot.uptime.as_secs_f64());
        println!(
            "Dispatches: {} ({} work-items)",
            snapshot.dispatches, snapshot.work_items
        );
        println!("Execution failures: {}", snapshot.execution_failures);
        println!(
            "Transferred: {} bytes up, {} bytes down",
            snapshot.bytes_uploaded, snapshot.bytes_downloaded
        );
        println!(
            "Builds: {} ({} failed, {} cache hits)",
            snapshot.builds, snapshot.build_failures, snapshot.cache_hits
        );

        if self.verbose {
            println!("\nCompletion latency:");
            println!(
                "  Average: {:.2}μs",
                snapshot.avg_latency_ns as f64 / 1_000.0
            );
            println!("  P50: {:.2}μs", snapshot.p50_latency_ns as f64 / 1_000.0);
            println!("  P99: {:.2}μs", snapshot.p99_latency_ns as f64 / 1_000.0);
            println!("  Max: {:.2}μs", snapshot.max_latency_ns as f64 / 1_000.0);

            println!("\nMemory:");
            println!(
                "  Allocated: {:.2}MB",
                snapshot.bytes_allocated as f64 / (1024.0 * 1024.0)
            );
        }

        println!("=============================");

        Ok(())
    }
}

impl Default for ConsoleExporter {
    fn default() -> Self {
        Self::new(false)
    }
}
