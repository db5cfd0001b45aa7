//! Lock-free counters for pipeline observability.
//!
//! All fields use `Ordering::Relaxed` — monotonic counters where eventual
//! visibility is acceptable for dashboard/status reads.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    /// Payloads popped from the work and retry queues.
    pub received: AtomicU64,
    /// Readings applied to history.
    pub processed: AtomicU64,
    /// Payloads skipped because their fingerprint was already applied.
    pub deduplicated: AtomicU64,
    /// Payloads dropped because they failed to parse.
    pub parse_failures: AtomicU64,
    /// Apply failures routed to the retry queue.
    pub retried: AtomicU64,
    /// Payloads that exhausted retries.
    pub dead_lettered: AtomicU64,
    /// Batches drained by workers.
    pub batches: AtomicU64,
}

/// Point-in-time view of the counters, for the status endpoint.
#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub received: u64,
    pub processed: u64,
    pub deduplicated: u64,
    pub parse_failures: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub batches: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            parse_failures: self.parse_failures.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counts() {
        let metrics = PipelineMetrics::new();
        metrics.add(&metrics.received, 5);
        metrics.add(&metrics.processed, 4);
        metrics.add(&metrics.deduplicated, 1);

        let snap = metrics.snapshot();
        assert_eq!(snap.received, 5);
        assert_eq!(snap.processed, 4);
        assert_eq!(snap.deduplicated, 1);
        assert_eq!(snap.dead_lettered, 0);
    }
}
