//! Aggregate progress over concurrent operations
//!
//! Each in-flight operation reports `(completed, total)` under its own
//! handle; listeners receive the combined percentage after every update.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifies one tracked operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgressHandle(u64);

type Listener = Box<dyn Fn(u8) + Send + Sync>;

#[derive(Default)]
pub struct ProgressAggregator {
    operations: DashMap<ProgressHandle, (u64, u64)>,
    next: AtomicU64,
    listeners: Mutex<Vec<Listener>>,
}

impl std::fmt::Debug for ProgressAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressAggregator")
            .field("operations", &self.operations.len())
            .field("percent", &self.percent())
            .finish_non_exhaustive()
    }
}

impl ProgressAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking an operation of `total` units
    pub fn register(&self, total: u64) -> ProgressHandle {
        let handle = ProgressHandle(self.next.fetch_add(1, Ordering::Relaxed));
        self.operations.insert(handle, (0, total));
        handle
    }

    pub fn update(&self, handle: ProgressHandle, completed: u64, total: u64) {
        self.operations.insert(handle, (completed.min(total), total));
        self.notify();
    }

    /// Mark an operation as fully done
    pub fn finish(&self, handle: ProgressHandle) {
        if let Some(mut entry) = self.operations.get_mut(&handle) {
            let total = entry.1.max(1);
            *entry = (total, total);
        }
        self.notify();
    }

    #[must_use]
    pub fn totals(&self) -> (u64, u64) {
        self.operations
            .iter()
            .fold((0, 0), |(done, total), entry| {
                (done + entry.value().0, total + entry.value().1)
            })
    }

    /// Combined percentage in `0..=100`; zero while nothing is known
    #[must_use]
    pub fn percent(&self) -> u8 {
        let (done, total) = self.totals();
        if total == 0 {
            return 0;
        }
        u8::try_from((done.saturating_mul(100) / total).min(100)).unwrap_or(100)
    }

    pub fn subscribe(&self, listener: impl Fn(u8) + Send + Sync + 'static) {
        self.listeners.lock().push(Box::new(listener));
    }

    fn notify(&self) {
        let percent = self.percent();
        for listener in self.listeners.lock().iter() {
            listener(percent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn combines_operations() {
        let progress = ProgressAggregator::new();
        let a = progress.register(100);
        let b = progress.register(300);
        assert_eq!(progress.percent(), 0);

        progress.update(a, 100, 100);
        assert_eq!(progress.percent(), 25);
        progress.update(b, 150, 300);
        assert_eq!(progress.percent(), 62);
        progress.finish(b);
        assert_eq!(progress.percent(), 100);
    }

    #[test]
    fn completed_never_exceeds_total() {
        let progress = ProgressAggregator::new();
        let a = progress.register(10);
        progress.update(a, 50, 10);
        assert_eq!(progress.totals(), (10, 10));
    }

    #[test]
    fn listeners_see_every_update() {
        let progress = ProgressAggregator::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        progress.subscribe(move |p| sink.lock().push(p));

        let a = progress.register(4);
        progress.update(a, 1, 4);
        progress.update(a, 2, 4);
        progress.finish(a);
        assert_eq!(*seen.lock(), vec![25, 50, 100]);
    }

    #[test]
    fn unknown_totals_report_zero() {
        let progress = ProgressAggregator::new();
        progress.register(0);
        assert_eq!(progress.percent(), 0);
    }
}
