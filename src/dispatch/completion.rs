use crate::driver::Event;
use crate::error::{Error, Result};
use crate::telemetry::Metrics;
use bytemuck::Pod;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Observable completion of one queued command.
pub struct CompletionHandle {
    event: Event,
    enqueued: Instant,
    metrics: Arc<Metrics>,
    counted: AtomicBool,
}

impl CompletionHandle {
    pub(crate) fn new(event: Event, metrics: Arc<Metrics>) -> Self {
        Self {
            event,
            enqueued: Instant::now(),
            metrics,
            counted: AtomicBool::new(false),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.event.is_complete()
    }

    /// Blocks until the command has run. Kernel failures surface here as
    /// [`Error::Execution`], on every call.
    pub fn wait(&self) -> Result<()> {
        let outcome = self.event.wait();
        self.metrics
            .record_latency(self.enqueued.elapsed().as_nanos() as u64);
        if let Err(Error::Execution { .. }) = &outcome {
            if !self.counted.swap(true, Ordering::Relaxed) {
                self.metrics.record_execution_failure();
            }
        }
        outcome.map(|_| ())
    }
}

impl fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionHandle")
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// A non-blocking download; [`PendingRead::wait`] yields the data.
pub struct PendingRead<T: Pod> {
    event: Event,
    enqueued: Instant,
    metrics: Arc<Metrics>,
    _marker: PhantomData<T>,
}

impl<T: Pod> PendingRead<T> {
    pub(crate) fn new(event: Event, metrics: Arc<Metrics>) -> Self {
        Self {
            event,
            enqueued: Instant::now(),
            metrics,
            _marker: PhantomData,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.event.is_complete()
    }

    pub fn wait(self) -> Result<Vec<T>> {
        let bytes = self.event.wait()?;
        self.metrics
            .record_latency(self.enqueued.elapsed().as_nanos() as u64);
        self.metrics.record_download(bytes.len());
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }
}

impl<T: Pod> fmt::Debug for PendingRead<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingRead")
            .field("element", &std::any::type_name::<T>())
            .field("complete", &self.is_complete())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_read_decodes_elements() {
        let bytes: Vec<u8> = [1.5f32, 2.5].iter().flat_map(|v| v.to_ne_bytes()).collect();
        let metrics = Arc::new(Metrics::new());
        let read = PendingRead::<f32>::new(Event::completed(Ok(bytes)), metrics.clone());

        assert!(read.is_complete());
        assert_eq!(read.wait().unwrap(), vec![1.5, 2.5]);
        #[cfg(feature = "telemetry")]
        assert_eq!(metrics.snapshot().bytes_downloaded, 8);
    }

    #[test]
    fn test_execution_failure_is_counted() {
        let metrics = Arc::new(Metrics::new());
        let handle = CompletionHandle::new(
            Event::completed(Err(Error::Execution {
                kernel: "saxpy".into(),
                message: "boom".into(),
            })),
            metrics.clone(),
        );

        assert!(matches!(handle.wait(), Err(Error::Execution { .. })));
        assert!(matches!(handle.wait(), Err(Error::Execution { .. })));
        #[cfg(feature = "telemetry")]
        assert_eq!(metrics.snapshot().execution_failures, 1);
    }
}
