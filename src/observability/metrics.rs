//! Execution counters
//!
//! Counters only, monotonic, shared between executors through an `Arc`.
//! Relaxed ordering: readers want totals, not a consistent cut.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lock-free counters covering plan selection, yielding and proximity
/// search
#[derive(Debug, Default)]
pub struct ExecutionMetrics {
    works: AtomicU64,
    advanced: AtomicU64,
    yields: AtomicU64,
    fetch_yields: AtomicU64,
    invalidations: AtomicU64,
    plans_selected: AtomicU64,
    plans_cached: AtomicU64,
    plans_uncached: AtomicU64,
    backup_failovers: AtomicU64,
    near_intervals: AtomicU64,
}

impl ExecutionMetrics {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// One `work()` call on an executor's root stage
    pub fn increment_works(&self) {
        self.works.fetch_add(1, Ordering::Relaxed);
    }

    /// One result handed to an executor's caller
    pub fn increment_advanced(&self) {
        self.advanced.fetch_add(1, Ordering::Relaxed);
    }

    /// One yield; `for_fetch` marks yields forced by a `NeedFetch`
    pub fn increment_yields(&self, for_fetch: bool) {
        self.yields.fetch_add(1, Ordering::Relaxed);
        if for_fetch {
            self.fetch_yields.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn increment_invalidations(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_plans_selected(&self) {
        self.plans_selected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_plans_cached(&self) {
        self.plans_cached.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_plans_uncached(&self) {
        self.plans_uncached.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_backup_failovers(&self) {
        self.backup_failovers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_near_intervals(&self) {
        self.near_intervals.fetch_add(1, Ordering::Relaxed);
    }

    /// Current values of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            captured_at: Utc::now(),
            works: self.works.load(Ordering::Relaxed),
            advanced: self.advanced.load(Ordering::Relaxed),
            yields: self.yields.load(Ordering::Relaxed),
            fetch_yields: self.fetch_yields.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            plans_selected: self.plans_selected.load(Ordering::Relaxed),
            plans_cached: self.plans_cached.load(Ordering::Relaxed),
            plans_uncached: self.plans_uncached.load(Ordering::Relaxed),
            backup_failovers: self.backup_failovers.load(Ordering::Relaxed),
            near_intervals: self.near_intervals.load(Ordering::Relaxed),
        }
    }

    /// Snapshot rendered as one JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A point-in-time copy of [`ExecutionMetrics`]
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub captured_at: DateTime<Utc>,
    pub works: u64,
    pub advanced: u64,
    pub yields: u64,
    pub fetch_yields: u64,
    pub invalidations: u64,
    pub plans_selected: u64,
    pub plans_cached: u64,
    pub plans_uncached: u64,
    pub backup_failovers: u64,
    pub near_intervals: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_has_zero_values() {
        let snapshot = ExecutionMetrics::new().snapshot();
        assert_eq!(snapshot.works, 0);
        assert_eq!(snapshot.yields, 0);
        assert_eq!(snapshot.plans_selected, 0);
    }

    #[test]
    fn test_fetch_yields_count_as_yields() {
        let metrics = ExecutionMetrics::new();
        metrics.increment_yields(false);
        metrics.increment_yields(true);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.yields, 2);
        assert_eq!(snapshot.fetch_yields, 1);
    }

    #[test]
    fn test_to_json() {
        let metrics = ExecutionMetrics::new();
        metrics.increment_works();
        metrics.increment_plans_cached();

        let parsed: serde_json::Value = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(parsed["works"], 1);
        assert_eq!(parsed["plans_cached"], 1);
        assert!(parsed["captured_at"].is_string());
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(ExecutionMetrics::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..100 {
                        m.increment_works();
                        m.increment_invalidations();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.works, 800);
        assert_eq!(snapshot.invalidations, 800);
    }
}
