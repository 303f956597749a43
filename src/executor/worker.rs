// one compute unit of a host device
use super::task::BatchTask;
use crossbeam_deque::{Injector, Steal, Stealer, Worker as LocalQueue};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub type UnitId = usize;

#[derive(Debug, Default)]
pub struct UnitCounters {
    pub batches_executed: AtomicU64,
    pub batches_stolen: AtomicU64,
}

/// Everything a compute unit shares with its pool.
pub(crate) struct Shared {
    pub injector: Arc<Injector<BatchTask>>,
    pub stealers: Vec<Stealer<BatchTask>>,
    pub shutdown: Arc<AtomicBool>,
    pub in_flight: Arc<AtomicUsize>,
}

pub(crate) struct ComputeUnit {
    pub id: UnitId,
    pub queue: LocalQueue<BatchTask>,
    pub counters: Arc<UnitCounters>,
}

impl ComputeUnit {
    pub fn new(id: UnitId) -> Self {
        Self {
            id,
            queue: LocalQueue::new_fifo(),
            counters: Arc::new(UnitCounters::default()),
        }
    }

    pub fn run(&self, shared: Shared) {
        let mut idle = Idle::default();

        while !shared.shutdown.load(Ordering::Acquire) {
            match self.next_batch(&shared) {
                Some(task) => {
                    idle.reset();
                    task.run();
                    self.counters.batches_executed.fetch_add(1, Ordering::Relaxed);
                    shared.in_flight.fetch_sub(1, Ordering::Relaxed);
                }
                None => idle.wait(),
            }
        }
    }

    // own queue, then the pool injector, then a random sibling
    fn next_batch(&self, shared: &Shared) -> Option<BatchTask> {
        self.queue
            .pop()
            .or_else(|| retry(|| shared.injector.steal_batch_and_pop(&self.queue)))
            .or_else(|| self.steal_from_sibling(&shared.stealers))
    }

    fn steal_from_sibling(&self, stealers: &[Stealer<BatchTask>]) -> Option<BatchTask> {
        use rand::seq::SliceRandom;

        let mut order: Vec<UnitId> = (0..stealers.len()).filter(|&i| i != self.id).collect();
        order.shuffle(&mut rand::thread_rng());

        let task = order
            .into_iter()
            .find_map(|i| retry(|| stealers[i].steal_batch_and_pop(&self.queue)))?;
        self.counters.batches_stolen.fetch_add(1, Ordering::Relaxed);
        Some(task)
    }
}

fn retry(mut attempt: impl FnMut() -> Steal<BatchTask>) -> Option<BatchTask> {
    loop {
        match attempt() {
            Steal::Success(task) => return Some(task),
            Steal::Empty => return None,
            Steal::Retry => continue,
        }
    }
}

/// Spin, then yield, then park briefly while no work-group is available.
#[derive(Debug, Default)]
struct Idle {
    rounds: u32,
}

impl Idle {
    const SPIN_ROUNDS: u32 = 8;
    const YIELD_ROUNDS: u32 = 16;

    fn reset(&mut self) {
        self.rounds = 0;
    }

    fn wait(&mut self) {
        self.rounds = self.rounds.saturating_add(1);
        if self.rounds <= Self::SPIN_ROUNDS {
            for _ in 0..(1u32 << self.rounds.min(6)) {
                std::hint::spin_loop();
            }
        } else if self.rounds <= Self::YIELD_ROUNDS {
            thread::yield_now();
        } else {
            thread::park_timeout(Duration::from_micros(500));
        }
    }
}
