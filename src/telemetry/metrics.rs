//! Runtime counters for dispatches, transfers and builds.

use hdrhistogram::Histogram;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters shared by a context and everything created from it.
#[derive(Debug)]
pub struct Metrics {
    dispatches: AtomicU64,
    work_items: AtomicU64,
    execution_failures: AtomicU64,

    bytes_uploaded: AtomicU64,
    bytes_downloaded: AtomicU64,

    builds: AtomicU64,
    build_failures: AtomicU64,
    cache_hits: AtomicU64,

    bytes_allocated: AtomicU64,

    // enqueue-to-completion latency of waited commands
    latency_histogram: RwLock<Histogram<u64>>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        // 3 significant figures, max 1 hour in nanoseconds
        let histogram =
            Histogram::new_with_max(3_600_000_000_000, 3).expect("valid histogram bounds");

        Self {
            dispatches: AtomicU64::new(0),
            work_items: AtomicU64::new(0),
            execution_failures: AtomicU64::new(0),
            bytes_uploaded: AtomicU64::new(0),
            bytes_downloaded: AtomicU64::new(0),
            builds: AtomicU64::new(0),
            build_failures: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            bytes_allocated: AtomicU64::new(0),
            latency_histogram: RwLock::new(histogram),
            start_time: Instant::now(),
        }
    }

    pub fn record_dispatch(&self, work_items: u64) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
        self.work_items.fetch_add(work_items, Ordering::Relaxed);
    }

    pub fn record_execution_failure(&self) {
        self.execution_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upload(&self, bytes: usize) {
        self.bytes_uploaded.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_download(&self, bytes: usize) {
        self.bytes_downloaded.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_build(&self, succeeded: bool) {
        self.builds.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.build_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_allocation(&self, bytes: u64) {
        self.bytes_allocated.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_release(&self, bytes: u64) {
        let _ = self
            .bytes_allocated
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(bytes))
            });
    }

    pub fn record_latency(&self, duration_ns: u64) {
        if let Some(mut hist) = self.latency_histogram.try_write() {
            let _ = hist.record(duration_ns);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let histogram = self.latency_histogram.read();

        MetricsSnapshot {
            timestamp: Instant::now(),
            uptime: self.start_time.elapsed(),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            work_items: self.work_items.load(Ordering::Relaxed),
            execution_failures: self.execution_failures.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            builds: self.builds.load(Ordering::Relaxed),
            build_failures: self.build_failures.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            bytes_allocated: self.bytes_allocated.load(Ordering::Relaxed),
            avg_latency_ns: if histogram.len() > 0 {
                histogram.mean() as u64
            } else {
                0
            },
            p50_latency_ns: histogram.value_at_quantile(0.50),
            p99_latency_ns: histogram.value_at_quantile(0.99),
            max_latency_ns: histogram.max(),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.dispatches,
            &self.work_items,
            &self.execution_failures,
            &self.bytes_uploaded,
            &self.bytes_downloaded,
            &self.builds,
            &self.build_failures,
            &self.cache_hits,
        ] {
            counter.store(0, Ordering::Relaxed);
        }

        if let Some(mut hist) = self.latency_histogram.try_write() {
            hist.reset();
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub timestamp: Instant,
    pub uptime: std::time::Duration,
    pub dispatches: u64,
    pub work_items: u64,
    pub execution_failures: u64,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
    pub builds: u64,
    pub build_failures: u64,
    pub cache_hits: u64,
    pub bytes_allocated: u64,
    pub avg_latency_ns: u64,
    pub p50_latency_ns: u64,
    pub p99_latency_ns: u64,
    pub max_latency_ns: u64,
}

impl MetricsSnapshot {
    /// Share of build requests answered from the program cache.
    pub fn cache_hit_ratio(&self) -> f64 {
        let requests = self.builds + self.cache_hits;
        if requests == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / requests as f64
    }

    pub fn work_items_per_second(&self) -> f64 {
        let seconds = self.uptime.as_secs_f64();
        if seconds == 0.0 {
            return 0.0;
        }
        self.work_items as f64 / seconds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_basic() {
        let metrics = Metrics::new();

        metrics.record_dispatch(64);
        metrics.record_dispatch(36);
        metrics.record_upload(400);
        metrics.record_latency(1000);
        metrics.record_latency(2000);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.dispatches, 2);
        assert_eq!(snapshot.work_items, 100);
        assert_eq!(snapshot.bytes_uploaded, 400);
        assert!(snapshot.avg_latency_ns > 0);
    }

    #[test]
    fn test_metrics_reset() {
        let metrics = Metrics::new();

        metrics.record_build(false);
        assert_eq!(metrics.snapshot().build_failures, 1);

        metrics.reset();
        assert_eq!(metrics.snapshot().builds, 0);
    }

    #[test]
    fn test_allocation_tracking_never_underflows() {
        let metrics = Metrics::new();
        metrics.record_allocation(100);
        metrics.record_release(60);
        metrics.record_release(60);
        assert_eq!(metrics.snapshot().bytes_allocated, 0);
    }

    #[test]
    fn test_cache_hit_ratio() {
        let metrics = Metrics::new();
        metrics.record_build(true);
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        assert_eq!(metrics.snapshot().cache_hit_ratio(), 0.75);
    }
}
