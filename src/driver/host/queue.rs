//! In-order command queues of the host driver.
//!
//! Every queue owns a submission thread that pops commands off a channel and
//! executes them one at a time, so commands complete in the order they were
//! enqueued. A kernel launch fans its work-groups out to the device's compute
//! units and joins them before the launch's event completes.
//!
//! The first failed launch is remembered by the queue: reads enqueued after
//! it fail with the same error, and the next marker (`finish`) reports it
//! and clears it.

use super::library::{KernelArgs, NativeKernel, WorkGroup};
use super::memory::DeviceMemory;
use crate::dispatch::WorkSize;
use crate::driver::Event;
use crate::error::{Error, Result};
use crate::executor::{CpuPool, PanicHandler};
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Upper bound for work-groups sized by the driver.
const AUTO_GROUP_LIMIT: usize = 64;

pub(crate) enum Command {
    Write {
        mem: Arc<DeviceMemory>,
        offset: usize,
        data: Vec<u8>,
        event: Event,
    },
    Read {
        mem: Arc<DeviceMemory>,
        offset: usize,
        len: usize,
        event: Event,
    },
    Launch {
        launch: Launch,
        event: Event,
    },
    Marker {
        event: Event,
    },
}

impl Command {
    fn event(&self) -> &Event {
        match self {
            Command::Write { event, .. }
            | Command::Read { event, .. }
            | Command::Launch { event, .. }
            | Command::Marker { event } => event,
        }
    }
}

/// How a launch's NDRange is cut into work-groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct GroupPlan {
    pub global: [usize; 3],
    pub local: [usize; 3],
    pub dims: usize,
}

impl GroupPlan {
    /// Uses the requested local extent, or picks one: the largest divisor of
    /// the first global extent not above the device limit (capped at 64),
    /// and 1 in the other dimensions.
    pub fn new(work: &WorkSize, max_work_group_size: usize) -> Self {
        let mut global = [1; 3];
        let mut local = [1; 3];
        let dims = work.dims().min(3);

        global[..dims].copy_from_slice(&work.global()[..dims]);

        match work.local() {
            Some(requested) => local[..dims].copy_from_slice(&requested[..dims]),
            None => {
                let cap = AUTO_GROUP_LIMIT.min(max_work_group_size).max(1);
                local[0] = (1..=cap.min(global[0]))
                    .rev()
                    .find(|d| global[0] % d == 0)
                    .unwrap_or(1);
            }
        }

        Self {
            global,
            local,
            dims,
        }
    }

    pub fn group_counts(&self) -> [usize; 3] {
        let mut counts = [1; 3];
        for d in 0..3 {
            counts[d] = self.global[d] / self.local[d];
        }
        counts
    }

    pub fn group_count(&self) -> usize {
        self.group_counts().iter().product()
    }

    /// The group at linear `index`, dimension 0 varying fastest.
    pub fn group(&self, index: usize) -> WorkGroup {
        let [cx, cy, _] = self.group_counts();
        let id = [index % cx, (index / cx) % cy, index / (cx * cy)];
        WorkGroup::new(id, self.local, self.global, self.dims)
    }
}

pub(crate) struct Launch {
    pub name: String,
    pub kernel: Arc<dyn NativeKernel>,
    pub args: KernelArgs,
    pub plan: GroupPlan,
    pub pool: Arc<CpuPool>,
}

impl Launch {
    fn execute(self) -> Result<()> {
        let Launch {
            name,
            kernel,
            args,
            plan,
            pool,
        } = self;

        let groups = plan.group_count();
        tracing::trace!(kernel = %name, groups, "launching");

        let body = Arc::new(move |index: usize| -> std::result::Result<(), String> {
            kernel
                .run_group(&plan.group(index), &args)
                .map_err(|fault| fault.0)
        });

        pool.run_indexed(groups, body)
            .map_err(|message| Error::Execution {
                kernel: name,
                message,
            })
    }
}

pub(crate) struct HostQueue {
    sender: Option<Sender<Command>>,
    thread: Option<JoinHandle<()>>,
}

impl HostQueue {
    pub fn spawn(name: String) -> Result<Self> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let thread = thread::Builder::new()
            .name(name)
            .spawn(move || run(receiver))
            .map_err(|e| Error::context_creation(format!("queue thread spawn failed: {}", e)))?;

        Ok(Self {
            sender: Some(sender),
            thread: Some(thread),
        })
    }

    pub fn submit(&self, command: Command) -> Result<Event> {
        let event = command.event().clone();
        let sender = self
            .sender
            .as_ref()
            .ok_or(Error::UseAfterClose { resource: "queue" })?;

        sender
            .send(command)
            .map_err(|_| Error::UseAfterClose { resource: "queue" })?;
        Ok(event)
    }

    /// Lets the thread drain what is already queued, then joins it.
    pub fn shutdown(&mut self) {
        self.sender.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("queue thread exited abnormally");
            }
        }
    }
}

impl Drop for HostQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(receiver: Receiver<Command>) {
    let panic_handler = PanicHandler::new();
    let mut fault: Option<Error> = None;

    for command in receiver {
        match command {
            Command::Write {
                mem,
                offset,
                data,
                event,
            } => {
                let result = if mem.write(offset, &data) {
                    Ok(Vec::new())
                } else {
                    Err(Error::transfer(format!(
                        "write of {} bytes at offset {} exceeds buffer of {} bytes",
                        data.len(),
                        offset,
                        mem.len()
                    )))
                };
                event.complete(result);
            }
            Command::Read {
                mem,
                offset,
                len,
                event,
            } => {
                let result = match &fault {
                    Some(err) => Err(err.replicate()),
                    None => mem.read(offset, len).ok_or_else(|| {
                        Error::transfer(format!(
                            "read of {} bytes at offset {} exceeds buffer of {} bytes",
                            len,
                            offset,
                            mem.len()
                        ))
                    }),
                };
                event.complete(result);
            }
            Command::Launch { launch, event } => {
                let name = launch.name.clone();
                let result = panic_handler
                    .execute(|| launch.execute())
                    .unwrap_or_else(|panic| {
                        Err(Error::Execution {
                            kernel: name,
                            message: format!("launch aborted: {}", panic.message),
                        })
                    });
                if let Err(err) = &result {
                    fault.get_or_insert_with(|| err.replicate());
                }
                event.complete(result.map(|()| Vec::new()));
            }
            Command::Marker { event } => event.complete(match fault.take() {
                Some(err) => Err(err),
                None => Ok(Vec::new()),
            }),
        }
    }
}
