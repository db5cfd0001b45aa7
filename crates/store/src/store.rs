//! The narrow store interface.
//!
//! Everything the system persists goes through [`MeterStore`]. The trait is
//! deliberately domain-shaped (enqueue readings, append history, write a
//! backup entry) rather than command-shaped, so callers cannot bypass the
//! atomic append path or invent new keys.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::StoreError;

/// A held per-meter lock. Release by passing it back to
/// [`MeterStore::release_meter_lock`]; the store only honors the release
/// if the token still matches (a lock that outlived its hold timeout may
/// have been re-acquired by another writer).
#[derive(Debug, Clone)]
pub struct MeterLock {
    pub meter_id: String,
    pub token: String,
}

/// Depths of the three failure-channel queues plus the live work queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueDepths {
    pub work: u64,
    pub retry: u64,
    pub dead_letter: u64,
}

#[async_trait]
pub trait MeterStore: Send + Sync {
    // ── Registry ──────────────────────────────────────────────

    /// Register a meter id. Returns `false` if it was already registered.
    async fn register_meter(&self, meter_id: &str) -> Result<bool, StoreError>;

    async fn is_registered(&self, meter_id: &str) -> Result<bool, StoreError>;

    // ── Queues ────────────────────────────────────────────────

    /// Append raw payloads to the tail of the shared work queue in one
    /// pipelined batch.
    async fn enqueue_readings(&self, payloads: &[String]) -> Result<(), StoreError>;

    /// Append raw payloads to a meter's pending list (maintenance routing).
    async fn enqueue_pending(&self, meter_id: &str, payloads: &[String]) -> Result<(), StoreError>;

    /// Pop up to `max` payloads from the head of the work queue, blocking
    /// up to `timeout` for the first item. Empty result means the queue
    /// stayed empty for the whole timeout.
    async fn pop_reading_batch(
        &self,
        max: usize,
        timeout: Duration,
    ) -> Result<Vec<String>, StoreError>;

    /// Pop up to `max` payloads from the retry queue without blocking.
    async fn pop_retry_batch(&self, max: usize) -> Result<Vec<String>, StoreError>;

    async fn queue_depths(&self) -> Result<QueueDepths, StoreError>;

    // ── Retry channel ─────────────────────────────────────────

    /// Increment a payload's apply-attempt counter, returning the new count.
    async fn bump_retry_count(&self, payload: &str) -> Result<u32, StoreError>;

    async fn clear_retry_count(&self, payload: &str) -> Result<(), StoreError>;

    async fn push_retry(&self, payload: &str) -> Result<(), StoreError>;

    async fn push_dead_letter(&self, payload: &str) -> Result<(), StoreError>;

    // ── Duplicate suppression ─────────────────────────────────

    /// Record a payload fingerprint. Returns `true` if it was new, `false`
    /// if this exact payload was already applied.
    async fn mark_processed(&self, fingerprint: &str) -> Result<bool, StoreError>;

    /// Forget a fingerprint (used when the apply that followed it failed,
    /// so a retried delivery is not treated as a duplicate).
    async fn unmark_processed(&self, fingerprint: &str) -> Result<(), StoreError>;

    // ── History ───────────────────────────────────────────────

    /// The single privileged operation: read the meter's last reading,
    /// derive the consumption delta, advance the last reading, and append
    /// the completed history record at `score` — atomically. Returns the
    /// derived consumption.
    ///
    /// `record_prefix` is the history-record JSON up to the consumption
    /// value (see `wattline_core::history_record_prefix`).
    async fn append_history_atomic(
        &self,
        meter_id: &str,
        reading_value: f64,
        score: f64,
        record_prefix: &str,
    ) -> Result<f64, StoreError>;

    /// History records with score in `[min_score, max_score]`, ascending.
    async fn history_range(
        &self,
        meter_id: &str,
        min_score: f64,
        max_score: f64,
    ) -> Result<Vec<String>, StoreError>;

    /// The most recent history record, if any.
    async fn history_latest(&self, meter_id: &str) -> Result<Option<String>, StoreError>;

    /// Remove history records with score `<= cutoff_score`. Returns the
    /// number removed.
    async fn trim_history_before(
        &self,
        meter_id: &str,
        cutoff_score: f64,
    ) -> Result<u64, StoreError>;

    // ── Pending ───────────────────────────────────────────────

    /// All payloads in a meter's pending list, in arrival order.
    async fn pending_items(&self, meter_id: &str) -> Result<Vec<String>, StoreError>;

    async fn delete_pending(&self, meter_id: &str) -> Result<(), StoreError>;

    // ── Scan ──────────────────────────────────────────────────

    /// Keys matching a glob pattern (`meter:*:history`, `backup:meter_data:2025-02-*`).
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    // ── Daily backup ──────────────────────────────────────────

    async fn set_backup_entry(
        &self,
        date: &str,
        meter_id: &str,
        usage: f64,
    ) -> Result<(), StoreError>;

    /// All entries of one date's backup hash, meter id -> summed usage.
    async fn backup_entries(&self, date: &str) -> Result<HashMap<String, f64>, StoreError>;

    // ── Logs ──────────────────────────────────────────────────

    /// Append a serialized log entry to `logs:{kind}`, trimming the stream
    /// to the most recent 1000 entries.
    async fn append_log(&self, kind: &str, entry: &str) -> Result<(), StoreError>;

    /// Up to `limit` most recent entries for a log kind, oldest first.
    async fn recent_logs(&self, kind: &str, limit: usize) -> Result<Vec<String>, StoreError>;

    // ── Per-meter lock ────────────────────────────────────────

    /// Acquire the meter's exclusive writer lock, retrying up to
    /// `acquire_timeout`. The lock self-releases after `hold_timeout`.
    /// `None` means the lock stayed contended for the whole window.
    async fn acquire_meter_lock(
        &self,
        meter_id: &str,
        acquire_timeout: Duration,
        hold_timeout: Duration,
    ) -> Result<Option<MeterLock>, StoreError>;

    async fn release_meter_lock(&self, lock: &MeterLock) -> Result<(), StoreError>;

    // ── Maintenance flag ──────────────────────────────────────

    /// Set the maintenance flag with a TTL. Returns `false` if the flag
    /// was already present (maintenance already running).
    async fn set_maintenance(&self, ttl: Duration) -> Result<bool, StoreError>;

    async fn clear_maintenance(&self) -> Result<(), StoreError>;

    async fn maintenance_active(&self) -> Result<bool, StoreError>;
}
