//! Completion events for enqueued commands.

use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;

enum EventState {
    Pending,
    // the payload is handed to the first waiter
    Done(Option<Vec<u8>>),
    Failed(Error),
}

struct EventInner {
    state: Mutex<EventState>,
    ready: Condvar,
}

/// Completion of one queued command, optionally carrying a payload
/// (the bytes of a read).
///
/// Clones observe the same command. A failure is reported to every waiter;
/// a read payload goes to the first one.
#[derive(Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    pub fn pending() -> Self {
        Self {
            inner: Arc::new(EventInner {
                state: Mutex::new(EventState::Pending),
                ready: Condvar::new(),
            }),
        }
    }

    /// An event for a command that already ran synchronously.
    pub fn completed(result: Result<Vec<u8>>) -> Self {
        let event = Self::pending();
        event.complete(result);
        event
    }

    pub fn complete(&self, result: Result<Vec<u8>>) {
        let mut state = self.inner.state.lock();
        if let EventState::Pending = *state {
            *state = match result {
                Ok(payload) => EventState::Done(Some(payload)),
                Err(err) => EventState::Failed(err),
            };
            self.inner.ready.notify_all();
        }
    }

    pub fn is_complete(&self) -> bool {
        !matches!(*self.inner.state.lock(), EventState::Pending)
    }

    pub fn wait(&self) -> Result<Vec<u8>> {
        let mut state = self.inner.state.lock();
        loop {
            match &mut *state {
                EventState::Pending => self.inner.ready.wait(&mut state),
                EventState::Done(payload) => return Ok(payload.take().unwrap_or_default()),
                EventState::Failed(err) => return Err(err.replicate()),
            }
        }
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("complete", &self.is_complete())
            .finish()
    }
}
