use super::panic_handler::PanicHandler;
use super::task::{batches, BatchTask};
use super::worker::{ComputeUnit, Shared, UnitCounters, UnitId};
use crate::config::Config;
use crate::error::{Error, Result};
use crossbeam_deque::Injector;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Batches queued per compute unit for one indexed run.
const BATCHES_PER_UNIT: usize = 4;

#[cfg(target_os = "linux")]
fn pin_to_core(core: usize) {
    let cores = num_cpus::get().max(1);
    // SAFETY: cpu_set_t is plain data and pid 0 targets the calling thread.
    let rc = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_SET(core % cores, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };
    if rc != 0 {
        tracing::warn!(core, "could not pin compute unit");
    }
}

/// The compute units of one host device: a work-stealing pool of threads
/// that execute work-groups.
pub struct CpuPool {
    units: Vec<UnitHandle>,
    injector: Arc<Injector<BatchTask>>,
    shutdown: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    next_wake: AtomicUsize,
    panic_handler: Arc<PanicHandler>,
}

struct UnitHandle {
    id: UnitId,
    thread: Option<JoinHandle<()>>,
    counters: Arc<UnitCounters>,
}

/// Aggregate counters across a pool's compute units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub batches_executed: u64,
    pub batches_stolen: u64,
    pub panics: usize,
}

impl CpuPool {
    pub fn new(label: &str, compute_units: usize, config: &Config) -> Result<Self> {
        if compute_units == 0 {
            return Err(Error::config("need at least 1 compute unit"));
        }

        let injector = Arc::new(Injector::new());
        let shutdown = Arc::new(AtomicBool::new(false));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let units: Vec<ComputeUnit> = (0..compute_units).map(ComputeUnit::new).collect();
        let stealers: Vec<_> = units.iter().map(|u| u.queue.stealer()).collect();

        let mut handles = Vec::with_capacity(compute_units);
        for unit in units {
            let id = unit.id;
            let counters = unit.counters.clone();
            let shared = Shared {
                injector: injector.clone(),
                stealers: stealers.clone(),
                shutdown: shutdown.clone(),
                in_flight: in_flight.clone(),
            };

            let mut builder =
                thread::Builder::new().name(format!("{}-{}-cu{}", config.thread_name_prefix, label, id));
            if let Some(stack_size) = config.stack_size {
                builder = builder.stack_size(stack_size);
            }

            let pin = config.pin_workers;
            let thread = builder
                .spawn(move || {
                    #[cfg(target_os = "linux")]
                    if pin {
                        pin_to_core(id);
                    }
                    #[cfg(not(target_os = "linux"))]
                    let _ = pin;
                    unit.run(shared);
                })
                .map_err(|e| Error::config(format!("compute unit spawn failed: {}", e)))?;

            handles.push(UnitHandle {
                id,
                thread: Some(thread),
                counters,
            });
        }

        tracing::debug!(device = label, compute_units, "compute units started");

        Ok(Self {
            units: handles,
            injector,
            shutdown,
            in_flight,
            next_wake: AtomicUsize::new(0),
            panic_handler: Arc::new(PanicHandler::new()),
        })
    }

    fn wake(&self, unit: usize) {
        if let Some(thread) = self.units.get(unit).and_then(|u| u.thread.as_ref()) {
            thread.thread().unpark();
        }
    }

    fn wake_all(&self) {
        (0..self.units.len()).for_each(|unit| self.wake(unit));
    }

    fn submit(&self, task: BatchTask) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        self.injector.push(task);
        let unit = self.next_wake.fetch_add(1, Ordering::Relaxed) % self.units.len();
        self.wake(unit);
    }

    /// Runs `f(0..count)` across the compute units and blocks until every
    /// index has finished. Indices are handed out in contiguous batches, a
    /// few per compute unit. Returns the first failure; panics count as
    /// failures.
    pub fn run_indexed<F>(&self, count: usize, f: Arc<F>) -> std::result::Result<(), String>
    where
        F: Fn(usize) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        if count == 0 {
            return Ok(());
        }

        let (tx, rx) = crossbeam_channel::unbounded();
        let mut submitted = 0;
        for range in batches(count, self.units.len() * BATCHES_PER_UNIT) {
            let f = f.clone();
            let tx = tx.clone();
            let panic_handler = self.panic_handler.clone();
            self.submit(BatchTask::new(range, move |groups| {
                let mut first = None;
                for group in groups {
                    let outcome = panic_handler
                        .execute(|| f(group))
                        .unwrap_or_else(|panic| Err(format!("panic: {}", panic.message)));
                    if let Err(message) = outcome {
                        first.get_or_insert(message);
                    }
                }
                let _ = tx.send(first.map_or(Ok(()), Err));
            }));
            submitted += 1;
        }
        drop(tx);
        self.wake_all();

        let mut first_error = None;
        for _ in 0..submitted {
            match rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(message)) => {
                    first_error.get_or_insert(message);
                }
                Err(_) => {
                    first_error.get_or_insert_with(|| "compute unit stopped".to_string());
                    break;
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Batches queued or running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    pub fn compute_units(&self) -> usize {
        self.units.len()
    }

    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats {
            panics: self.panic_handler.panic_count(),
            ..PoolStats::default()
        };
        for unit in &self.units {
            stats.batches_executed += unit.counters.batches_executed.load(Ordering::Relaxed);
            stats.batches_stolen += unit.counters.batches_stolen.load(Ordering::Relaxed);
        }
        stats
    }

    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.wake_all();

        for unit in &mut self.units {
            if let Some(thread) = unit.thread.take() {
                if thread.join().is_err() {
                    tracing::error!(unit = unit.id, "compute unit exited abnormally");
                }
            }
        }
    }
}

impl Drop for CpuPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for CpuPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuPool")
            .field("compute_units", &self.compute_units())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    fn pool(threads: usize) -> CpuPool {
        let config = Config::builder().compute_units(threads).build().unwrap();
        CpuPool::new("test", threads, &config).unwrap()
    }

    #[test]
    fn test_run_indexed_visits_every_index() {
        let pool = pool(4);
        let sum = Arc::new(AtomicU64::new(0));
        let sum_clone = sum.clone();

        let result = pool.run_indexed(
            100,
            Arc::new(move |i: usize| -> std::result::Result<(), String> {
                sum_clone.fetch_add(i as u64, Ordering::Relaxed);
                Ok(())
            }),
        );

        assert!(result.is_ok());
        assert_eq!(sum.load(Ordering::Relaxed), 4950);
    }

    #[test]
    fn test_large_range_runs_in_bounded_batches() {
        let pool = pool(2);
        let count = 1 << 22;
        let visited = Arc::new(AtomicU64::new(0));
        let visited_clone = visited.clone();

        let result = pool.run_indexed(
            count,
            Arc::new(move |_: usize| -> std::result::Result<(), String> {
                visited_clone.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }),
        );

        assert!(result.is_ok());
        assert_eq!(visited.load(Ordering::Relaxed), count as u64);
    }

    #[test]
    fn test_run_indexed_reports_failure_after_joining_all() {
        let pool = pool(2);
        let done = Arc::new(AtomicU64::new(0));
        let done_clone = done.clone();

        let result = pool.run_indexed(
            10,
            Arc::new(move |i: usize| -> std::result::Result<(), String> {
                done_clone.fetch_add(1, Ordering::Relaxed);
                if i == 3 {
                    Err("group 3 failed".to_string())
                } else {
                    Ok(())
                }
            }),
        );

        assert_eq!(result.unwrap_err(), "group 3 failed");
        assert_eq!(done.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn test_panicking_group_becomes_error() {
        let pool = pool(2);
        let result = pool.run_indexed(
            4,
            Arc::new(|i: usize| -> std::result::Result<(), String> {
                if i == 1 {
                    panic!("boom");
                }
                Ok(())
            }),
        );

        assert!(result.unwrap_err().contains("boom"));
        assert_eq!(pool.stats().panics, 1);
    }

    #[test]
    fn test_zero_threads_rejected() {
        let config = Config::default();
        assert!(CpuPool::new("test", 0, &config).is_err());
    }
}
