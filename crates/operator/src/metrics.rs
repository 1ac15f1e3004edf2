//! Counters surfaced through the web server alongside diagnostics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

/// Monotonic operator counters. Cheap to clone and share across controllers.
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    scans_started: AtomicU64,
    scans_done: AtomicU64,
    scan_errors: AtomicU64,
    check_results_written: AtomicU64,
    remediations_applied: AtomicU64,
    reconcile_errors: AtomicU64,
}

/// Snapshot rendered as JSON by the web server.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub scans_started: u64,
    pub scans_done: u64,
    pub scan_errors: u64,
    pub check_results_written: u64,
    pub remediations_applied: u64,
    pub reconcile_errors: u64,
}

impl Metrics {
    pub fn scan_started(&self) {
        self.inner.scans_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn scan_done(&self) {
        self.inner.scans_done.fetch_add(1, Ordering::Relaxed);
    }

    pub fn scan_error(&self) {
        self.inner.scan_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn check_results_written(&self, count: u64) {
        self.inner
            .check_results_written
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn remediation_applied(&self) {
        self.inner.remediations_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reconcile_error(&self) {
        self.inner.reconcile_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            scans_started: self.inner.scans_started.load(Ordering::Relaxed),
            scans_done: self.inner.scans_done.load(Ordering::Relaxed),
            scan_errors: self.inner.scan_errors.load(Ordering::Relaxed),
            check_results_written: self.inner.check_results_written.load(Ordering::Relaxed),
            remediations_applied: self.inner.remediations_applied.load(Ordering::Relaxed),
            reconcile_errors: self.inner.reconcile_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_across_clones() {
        let metrics = Metrics::default();
        let shared = metrics.clone();
        metrics.scan_started();
        shared.scan_started();
        shared.check_results_written(12);

        let snap = metrics.snapshot();
        assert_eq!(snap.scans_started, 2);
        assert_eq!(snap.check_results_written, 12);
        assert_eq!(snap.scan_errors, 0);
    }
}
