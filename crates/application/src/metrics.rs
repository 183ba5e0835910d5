//! Dispatcher metrics
//!
//! Per-instance counters shared by all partition workers.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one dispatcher instance.
#[derive(Debug, Default)]
pub struct DispatcherMetrics {
    records_dispatched: AtomicU64,
    delivery_retries: AtomicU64,
    records_dead_lettered: AtomicU64,
    leases_lost: AtomicU64,
    batches: AtomicU64,
}

impl DispatcherMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_dispatched(&self) {
        self.records_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_retried(&self) {
        self.delivery_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dead_lettered(&self) {
        self.records_dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_lease_lost(&self) {
        self.leases_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DispatcherMetricsSnapshot {
        DispatcherMetricsSnapshot {
            records_dispatched: self.records_dispatched.load(Ordering::Relaxed),
            delivery_retries: self.delivery_retries.load(Ordering::Relaxed),
            records_dead_lettered: self.records_dead_lettered.load(Ordering::Relaxed),
            leases_lost: self.leases_lost.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of metrics for reporting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherMetricsSnapshot {
    pub records_dispatched: u64,
    pub delivery_retries: u64,
    pub records_dead_lettered: u64,
    pub leases_lost: u64,
    pub batches: u64,
}

impl std::fmt::Display for DispatcherMetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Dispatcher Metrics:
  Records Dispatched: {}
  Delivery Retries: {}
  Records Dead-Lettered: {}
  Leases Lost: {}
  Batches Processed: {}",
            self.records_dispatched,
            self.delivery_retries,
            self.records_dead_lettered,
            self.leases_lost,
            self.batches
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = DispatcherMetrics::new();
        metrics.inc_dispatched();
        metrics.inc_dispatched();
        metrics.inc_retried();
        metrics.inc_dead_lettered();
        metrics.inc_lease_lost();
        metrics.inc_batch();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.records_dispatched, 2);
        assert_eq!(snapshot.delivery_retries, 1);
        assert_eq!(snapshot.records_dead_lettered, 1);
        assert_eq!(snapshot.leases_lost, 1);
        assert_eq!(snapshot.batches, 1);
    }

    #[test]
    fn test_display_lists_every_counter() {
        let metrics = DispatcherMetrics::new();
        metrics.inc_dispatched();
        let rendered = metrics.snapshot().to_string();
        assert!(rendered.contains("Records Dispatched: 1"));
        assert!(rendered.contains("Leases Lost: 0"));
    }
}
