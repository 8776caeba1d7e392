//! Progress tracker (C2)
//!
//! Atomic byte/file counters with optional parent aggregation: any non-zero
//! delta applied to a child tracker is also applied to every ancestor
//! exactly once. Reporting is debounced by a compare-and-set "in-flight"
//! flag so at most one reporter thread runs at a time; a report requested
//! while one is in flight coalesces into a single follow-up report.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Callback invoked on a (debounced) progress report.
pub trait ProgressHandler: Send + Sync {
    /// Called with a snapshot of the tracker's counters.
    fn report(&self, snapshot: ProgressSnapshot);
}

/// Point-in-time view of a tracker's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProgressSnapshot {
    pub bytes: u64,
    pub files_transferred: u64,
    pub files_skipped: u64,
    pub files_failed: u64,
}

impl ProgressSnapshot {
    /// Total files accounted for (transferred + skipped + failed).
    pub fn total_accounted(&self) -> u64 {
        self.files_transferred + self.files_skipped + self.files_failed
    }
}

/// Atomic progress counters with optional parent aggregation.
pub struct ProgressTracker {
    bytes: AtomicU64,
    files_transferred: AtomicU64,
    files_skipped: AtomicU64,
    files_failed: AtomicU64,
    parent: Option<Arc<ProgressTracker>>,
    handler: Option<Arc<dyn ProgressHandler>>,
    report_in_flight: AtomicBool,
    report_pending: AtomicBool,
}

impl ProgressTracker {
    /// Create a root tracker with no parent and no report handler.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            bytes: AtomicU64::new(0),
            files_transferred: AtomicU64::new(0),
            files_skipped: AtomicU64::new(0),
            files_failed: AtomicU64::new(0),
            parent: None,
            handler: None,
            report_in_flight: AtomicBool::new(false),
            report_pending: AtomicBool::new(false),
        })
    }

    /// Create a root tracker with a report handler attached.
    pub fn with_handler(handler: Arc<dyn ProgressHandler>) -> Arc<Self> {
        Arc::new(Self {
            bytes: AtomicU64::new(0),
            files_transferred: AtomicU64::new(0),
            files_skipped: AtomicU64::new(0),
            files_failed: AtomicU64::new(0),
            parent: None,
            handler: Some(handler),
            report_in_flight: AtomicBool::new(false),
            report_pending: AtomicBool::new(false),
        })
    }

    /// Create a child tracker that aggregates into `parent` on every update.
    /// The child inherits the parent's report handler is not copied — only
    /// the root's handler fires, since aggregation always bubbles up to it.
    pub fn child_of(parent: &Arc<ProgressTracker>) -> Arc<Self> {
        Arc::new(Self {
            bytes: AtomicU64::new(0),
            files_transferred: AtomicU64::new(0),
            files_skipped: AtomicU64::new(0),
            files_failed: AtomicU64::new(0),
            parent: Some(Arc::clone(parent)),
            handler: None,
            report_in_flight: AtomicBool::new(false),
            report_pending: AtomicBool::new(false),
        })
    }

    /// Record `delta` bytes transferred, propagating to every ancestor.
    pub fn add_bytes(&self, delta: u64) {
        if delta == 0 {
            return;
        }
        self.bytes.fetch_add(delta, Ordering::Relaxed);
        if let Some(parent) = &self.parent {
            parent.add_bytes(delta);
        }
        self.maybe_report();
    }

    /// Record one file transferred.
    pub fn add_file_transferred(&self) {
        self.files_transferred.fetch_add(1, Ordering::Relaxed);
        if let Some(parent) = &self.parent {
            parent.add_file_transferred();
        }
        self.maybe_report();
    }

    /// Record one file skipped.
    pub fn add_file_skipped(&self) {
        self.files_skipped.fetch_add(1, Ordering::Relaxed);
        if let Some(parent) = &self.parent {
            parent.add_file_skipped();
        }
        self.maybe_report();
    }

    /// Record one file failed.
    pub fn add_file_failed(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
        if let Some(parent) = &self.parent {
            parent.add_file_failed();
        }
        self.maybe_report();
    }

    /// Current counter snapshot.
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            bytes: self.bytes.load(Ordering::Relaxed),
            files_transferred: self.files_transferred.load(Ordering::Relaxed),
            files_skipped: self.files_skipped.load(Ordering::Relaxed),
            files_failed: self.files_failed.load(Ordering::Relaxed),
        }
    }

    /// Attempt to run the report handler, debounced: if a report is already
    /// in flight, mark one pending and return — the in-flight report's
    /// caller drains the pending flag before releasing the in-flight lock.
    fn maybe_report(&self) {
        let Some(handler) = &self.handler else {
            return;
        };

        if self
            .report_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.report_pending.store(true, Ordering::Release);
            return;
        }

        loop {
            handler.report(self.snapshot());
            // If another update arrived while we were reporting, loop once
            // more instead of dropping it; otherwise release the flag.
            if self
                .report_pending
                .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                break;
            }
        }
        self.report_in_flight.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct RecordingHandler(Mutex<Vec<ProgressSnapshot>>);

    impl ProgressHandler for RecordingHandler {
        fn report(&self, snapshot: ProgressSnapshot) {
            self.0.lock().unwrap().push(snapshot);
        }
    }

    #[test]
    fn child_updates_propagate_to_parent() {
        let parent = ProgressTracker::new();
        let child = ProgressTracker::child_of(&parent);

        child.add_bytes(100);
        child.add_file_transferred();

        let snap = parent.snapshot();
        assert_eq!(snap.bytes, 100);
        assert_eq!(snap.files_transferred, 1);
    }

    #[test]
    fn counters_are_monotonic() {
        let tracker = ProgressTracker::new();
        tracker.add_bytes(10);
        tracker.add_bytes(20);
        tracker.add_file_failed();
        let snap = tracker.snapshot();
        assert_eq!(snap.bytes, 30);
        assert_eq!(snap.files_failed, 1);
        assert_eq!(snap.total_accounted(), 1);
    }

    #[test]
    fn reports_fire_on_update() {
        let handler = Arc::new(RecordingHandler(Mutex::new(Vec::new())));
        let tracker = ProgressTracker::with_handler(handler.clone());
        tracker.add_bytes(5);
        tracker.add_file_transferred();
        let reports = handler.0.lock().unwrap();
        assert!(!reports.is_empty());
        assert_eq!(reports.last().unwrap().files_transferred, 1);
    }

    #[test]
    fn zero_delta_is_a_noop() {
        let tracker = ProgressTracker::new();
        tracker.add_bytes(0);
        assert_eq!(tracker.snapshot().bytes, 0);
    }
}
