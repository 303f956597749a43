//! Batches of work-groups as queued on a compute-unit pool.

use std::ops::Range;

/// A contiguous run of work-group indices awaiting a compute unit, and the
/// body that executes them.
pub(crate) struct BatchTask {
    pub(crate) groups: Range<usize>,
    body: Box<dyn FnOnce(Range<usize>) + Send + 'static>,
}

impl BatchTask {
    pub fn new<F>(groups: Range<usize>, body: F) -> Self
    where
        F: FnOnce(Range<usize>) + Send + 'static,
    {
        BatchTask {
            groups,
            body: Box::new(body),
        }
    }

    pub fn run(self) {
        (self.body)(self.groups);
    }
}

impl std::fmt::Debug for BatchTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchTask")
            .field("groups", &self.groups)
            .finish()
    }
}

/// Splits `0..count` into at most `max_batches` contiguous ranges of nearly
/// equal length.
pub(crate) fn batches(count: usize, max_batches: usize) -> impl Iterator<Item = Range<usize>> {
    let n = count.min(max_batches.max(1));
    let (base, extra) = if n == 0 { (0, 0) } else { (count / n, count % n) };
    (0..n).map(move |i| {
        let start = i * base + i.min(extra);
        let len = base + usize::from(i < extra);
        start..start + len
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_body_receives_its_range() {
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        let task = BatchTask::new(4..9, move |groups| {
            *seen_clone.lock() = Some(groups);
        });
        assert_eq!(format!("{:?}", task), "BatchTask { groups: 4..9 }");
        task.run();
        assert_eq!(*seen.lock(), Some(4..9));
    }

    #[test]
    fn test_batches_cover_range_exactly() {
        let ranges: Vec<_> = batches(10, 4).collect();
        assert_eq!(ranges, vec![0..3, 3..6, 6..8, 8..10]);

        let ranges: Vec<_> = batches(3, 8).collect();
        assert_eq!(ranges, vec![0..1, 1..2, 2..3]);

        assert_eq!(batches(0, 8).count(), 0);
        assert_eq!(batches(usize::MAX, 16).map(|r| r.len()).sum::<usize>(), usize::MAX);
    }
}
