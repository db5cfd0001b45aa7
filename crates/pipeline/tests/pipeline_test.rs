//! End-to-end pipeline tests against the in-memory store backend:
//! delta derivation, dedupe, ordering, maintenance routing, rollup,
//! retention, and the retry/dead-letter channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};

use wattline_core::config::{MaintenanceConfig, PipelineConfig};
use wattline_core::reading::HistoryRecord;
use wattline_pipeline::worker::process_batch;
use wattline_pipeline::{MaintenanceDriver, PipelineMetrics, WorkerPool};
use wattline_store::store::{MeterLock, QueueDepths};
use wattline_store::{MemoryStore, MeterStore, StoreError};

const METER: &str = "100000001";

fn payload(meter_id: &str, ts: &str, value: f64) -> String {
    format!(r#"{{"meter_id":"{meter_id}","timestamp":"{ts}","reading":{value}}}"#)
}

fn pipeline_config() -> PipelineConfig {
    PipelineConfig {
        worker_count: 2,
        batch_size: 100,
        max_retries: 3,
        bulk_max_items: 1000,
        pop_timeout_ms: 20,
    }
}

fn maintenance_config(duration_secs: u64, keep_days: u32) -> MaintenanceConfig {
    MaintenanceConfig { duration_secs, keep_days }
}

/// Drain the work queue to empty through the real batch path.
async fn drain_work_queue(store: &dyn MeterStore, metrics: &PipelineMetrics) {
    let config = pipeline_config();
    loop {
        let batch = store
            .pop_reading_batch(config.batch_size, Duration::from_millis(10))
            .await
            .unwrap();
        if batch.is_empty() {
            break;
        }
        process_batch(store, &config, metrics, batch).await;
    }
}

async fn history(store: &dyn MeterStore, meter_id: &str) -> Vec<HistoryRecord> {
    store
        .history_range(meter_id, f64::NEG_INFINITY, f64::INFINITY)
        .await
        .unwrap()
        .iter()
        .map(|raw| serde_json::from_str(raw).unwrap())
        .collect()
}

// ── Delta correctness (S1) ───────────────────────────────────────

#[tokio::test]
async fn test_deltas_follow_submission_order() {
    let store = MemoryStore::new();
    let metrics = PipelineMetrics::new();
    store
        .enqueue_readings(&[
            payload(METER, "2025-02-20T10:00:00", 100.0),
            payload(METER, "2025-02-20T10:30:00", 102.5),
            payload(METER, "2025-02-20T11:00:00", 105.0),
        ])
        .await
        .unwrap();

    drain_work_queue(&store, &metrics).await;

    let records = history(&store, METER).await;
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].consumption, 0.0);
    assert_eq!(records[1].consumption, 2.5);
    assert_eq!(records[2].consumption, 2.5);
    assert_eq!(records[2].reading_value, 105.0);

    // Latest record carries the most recent increment.
    let latest: HistoryRecord =
        serde_json::from_str(&store.history_latest(METER).await.unwrap().unwrap()).unwrap();
    assert_eq!(latest.consumption, 2.5);
    assert_eq!(metrics.snapshot().processed, 3);
}

// ── Idempotence (S2) ─────────────────────────────────────────────

#[tokio::test]
async fn test_duplicate_delivery_applies_once() {
    let store = MemoryStore::new();
    let metrics = PipelineMetrics::new();
    let second = payload(METER, "2025-02-20T10:30:00", 102.5);
    store
        .enqueue_readings(&[
            payload(METER, "2025-02-20T10:00:00", 100.0),
            second.clone(),
            payload(METER, "2025-02-20T11:00:00", 105.0),
        ])
        .await
        .unwrap();
    drain_work_queue(&store, &metrics).await;

    // The exact same payload delivered again.
    store.enqueue_readings(&[second]).await.unwrap();
    drain_work_queue(&store, &metrics).await;

    let records = history(&store, METER).await;
    assert_eq!(records.len(), 3);
    assert_eq!(metrics.snapshot().deduplicated, 1);
}

// ── In-batch ordering (S3) ───────────────────────────────────────

#[tokio::test]
async fn test_out_of_order_batch_is_sorted_before_apply() {
    let store = MemoryStore::new();
    let metrics = PipelineMetrics::new();
    store
        .enqueue_readings(&[payload(METER, "2025-02-20T11:00:00", 105.0)])
        .await
        .unwrap();
    drain_work_queue(&store, &metrics).await;

    // A bulk submission with timestamps out of order.
    store
        .enqueue_readings(&[
            payload(METER, "2025-02-20T12:00:00", 110.0),
            payload(METER, "2025-02-20T11:30:00", 107.0),
        ])
        .await
        .unwrap();
    drain_work_queue(&store, &metrics).await;

    let records = history(&store, METER).await;
    assert_eq!(records.len(), 3);
    assert_eq!(records[1].reading_value, 107.0);
    assert_eq!(records[1].consumption, 2.0);
    assert_eq!(records[2].reading_value, 110.0);
    assert_eq!(records[2].consumption, 3.0);
}

// ── Cross-batch reordering is stored as-is ───────────────────────

#[tokio::test]
async fn test_late_reading_across_batches_computes_as_is() {
    let store = MemoryStore::new();
    let metrics = PipelineMetrics::new();
    store
        .enqueue_readings(&[payload(METER, "2025-02-20T12:00:00", 110.0)])
        .await
        .unwrap();
    drain_work_queue(&store, &metrics).await;

    // An earlier timestamp arriving in a later batch: the delta is taken
    // against the now-higher last reading and goes negative.
    store
        .enqueue_readings(&[payload(METER, "2025-02-20T11:30:00", 107.0)])
        .await
        .unwrap();
    drain_work_queue(&store, &metrics).await;

    let records = history(&store, METER).await;
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].reading_value, 107.0);
    assert_eq!(records[0].consumption, -3.0);
}

// ── Maintenance routing and drain (S4) ───────────────────────────

#[tokio::test]
async fn test_pending_drain_continues_the_delta_chain() {
    let store = Arc::new(MemoryStore::new());
    let metrics = PipelineMetrics::new();
    store
        .enqueue_readings(&[
            payload(METER, "2025-02-20T10:00:00", 100.0),
            payload(METER, "2025-02-20T10:30:00", 102.5),
        ])
        .await
        .unwrap();
    drain_work_queue(store.as_ref(), &metrics).await;

    // Submitted during the maintenance window — quarantined per meter.
    store
        .enqueue_pending(METER, &[payload(METER, "2025-02-20T11:00:00", 106.0)])
        .await
        .unwrap();

    let driver = MaintenanceDriver::new(store.clone(), maintenance_config(0, 365));
    let drained = driver.drain_pending().await.unwrap();
    assert_eq!(drained, 1);

    let records = history(store.as_ref(), METER).await;
    assert_eq!(records.len(), 3);
    assert_eq!(records[2].reading_value, 106.0);
    assert_eq!(records[2].consumption, 3.5);

    // The pending list is gone.
    assert!(store.pending_items(METER).await.unwrap().is_empty());
    assert!(store
        .scan_keys("meter:*:pending")
        .await
        .unwrap()
        .is_empty());
}

// ── Daily rollup (S5 / backup sum law) ───────────────────────────

#[tokio::test]
async fn test_rollup_sums_consumption_per_utc_day() {
    let store = Arc::new(MemoryStore::new());
    let metrics = PipelineMetrics::new();
    // Four records on 2025-02-19 whose consumptions sum to 8.75.
    store
        .enqueue_readings(&[
            payload(METER, "2025-02-19T00:30:00", 100.00),
            payload(METER, "2025-02-19T06:00:00", 102.50),
            payload(METER, "2025-02-19T12:00:00", 106.25),
            payload(METER, "2025-02-19T18:00:00", 108.75),
        ])
        .await
        .unwrap();
    // A record on the next day must not contribute.
    store
        .enqueue_readings(&[payload(METER, "2025-02-20T01:00:00", 110.00)])
        .await
        .unwrap();
    drain_work_queue(store.as_ref(), &metrics).await;

    let driver = MaintenanceDriver::new(store.clone(), maintenance_config(0, 365));
    let date = NaiveDate::from_ymd_opt(2025, 2, 19).unwrap();
    let meters = driver.rollup_date(date).await.unwrap();
    assert_eq!(meters, 1);

    let backup = store.backup_entries("2025-02-19").await.unwrap();
    assert_eq!(backup.len(), 1);
    assert!((backup[METER] - 8.75).abs() < 1e-9);
}

// ── Retention trim (S6) ──────────────────────────────────────────

#[tokio::test]
async fn test_trim_removes_records_past_retention() {
    let store = Arc::new(MemoryStore::new());
    let metrics = PipelineMetrics::new();

    let old_ts = (Utc::now() - ChronoDuration::seconds(200_000))
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string();
    let fresh_ts = Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string();
    store
        .enqueue_readings(&[payload(METER, &old_ts, 50.0), payload(METER, &fresh_ts, 60.0)])
        .await
        .unwrap();
    drain_work_queue(store.as_ref(), &metrics).await;
    assert_eq!(history(store.as_ref(), METER).await.len(), 2);

    let driver = MaintenanceDriver::new(store.clone(), maintenance_config(0, 1));
    let removed = driver.trim_history().await.unwrap();
    assert_eq!(removed, 1);

    let records = history(store.as_ref(), METER).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].reading_value, 60.0);
}

// ── Full maintenance run clears the flag ─────────────────────────

#[tokio::test]
async fn test_maintenance_run_clears_flag_even_after_stages() {
    let store = Arc::new(MemoryStore::new());
    store
        .enqueue_pending(METER, &[payload(METER, "2025-02-20T11:00:00", 10.0)])
        .await
        .unwrap();

    let driver = MaintenanceDriver::new(store.clone(), maintenance_config(0, 365));
    assert!(driver.trigger().await.unwrap());

    // The spawned driver finishes quickly with a zero-length window.
    let mut waited = 0;
    while store.scan_keys("meter:*:pending").await.unwrap().len() > 0 && waited < 100 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 1;
    }
    assert!(store.scan_keys("meter:*:pending").await.unwrap().is_empty());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!store.maintenance_active().await.unwrap());
    assert_eq!(history(store.as_ref(), METER).await.len(), 1);
}

// ── Worker pool end-to-end ───────────────────────────────────────

#[tokio::test]
async fn test_worker_pool_drains_queue() {
    let store: Arc<dyn MeterStore> = Arc::new(MemoryStore::new());
    let metrics = Arc::new(PipelineMetrics::new());
    let mut pool = WorkerPool::new(store.clone(), pipeline_config(), metrics.clone());
    pool.start(2);

    let payloads: Vec<String> = (0..20)
        .map(|i| payload(METER, &format!("2025-02-20T10:{:02}:00", i), 100.0 + i as f64))
        .collect();
    store.enqueue_readings(&payloads).await.unwrap();

    let mut waited = 0;
    while metrics.snapshot().processed < 20 && waited < 200 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 1;
    }
    pool.stop().await;

    let records = history(store.as_ref(), METER).await;
    assert_eq!(records.len(), 20);
    // Per-meter locking serialized the appends: every delta is exactly 1.
    for record in &records[1..] {
        assert_eq!(record.consumption, 1.0);
    }
}

// ── Retry channel and dead letter ────────────────────────────────

/// Store wrapper whose atomic append fails a configured number of times,
/// to drive payloads through the retry channel.
struct FlakyStore {
    inner: MemoryStore,
    failures_left: AtomicU32,
}

impl FlakyStore {
    fn failing(times: u32) -> Self {
        Self {
            inner: MemoryStore::new(),
            failures_left: AtomicU32::new(times),
        }
    }
}

#[async_trait]
impl MeterStore for FlakyStore {
    async fn register_meter(&self, meter_id: &str) -> Result<bool, StoreError> {
        self.inner.register_meter(meter_id).await
    }
    async fn is_registered(&self, meter_id: &str) -> Result<bool, StoreError> {
        self.inner.is_registered(meter_id).await
    }
    async fn enqueue_readings(&self, payloads: &[String]) -> Result<(), StoreError> {
        self.inner.enqueue_readings(payloads).await
    }
    async fn enqueue_pending(&self, meter_id: &str, payloads: &[String]) -> Result<(), StoreError> {
        self.inner.enqueue_pending(meter_id, payloads).await
    }
    async fn pop_reading_batch(
        &self,
        max: usize,
        timeout: Duration,
    ) -> Result<Vec<String>, StoreError> {
        self.inner.pop_reading_batch(max, timeout).await
    }
    async fn pop_retry_batch(&self, max: usize) -> Result<Vec<String>, StoreError> {
        self.inner.pop_retry_batch(max).await
    }
    async fn queue_depths(&self) -> Result<QueueDepths, StoreError> {
        self.inner.queue_depths().await
    }
    async fn bump_retry_count(&self, payload: &str) -> Result<u32, StoreError> {
        self.inner.bump_retry_count(payload).await
    }
    async fn clear_retry_count(&self, payload: &str) -> Result<(), StoreError> {
        self.inner.clear_retry_count(payload).await
    }
    async fn push_retry(&self, payload: &str) -> Result<(), StoreError> {
        self.inner.push_retry(payload).await
    }
    async fn push_dead_letter(&self, payload: &str) -> Result<(), StoreError> {
        self.inner.push_dead_letter(payload).await
    }
    async fn mark_processed(&self, fingerprint: &str) -> Result<bool, StoreError> {
        self.inner.mark_processed(fingerprint).await
    }
    async fn unmark_processed(&self, fingerprint: &str) -> Result<(), StoreError> {
        self.inner.unmark_processed(fingerprint).await
    }
    async fn append_history_atomic(
        &self,
        meter_id: &str,
        reading_value: f64,
        score: f64,
        record_prefix: &str,
    ) -> Result<f64, StoreError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::Command("injected failure".to_string()));
        }
        self.inner
            .append_history_atomic(meter_id, reading_value, score, record_prefix)
            .await
    }
    async fn history_range(
        &self,
        meter_id: &str,
        min_score: f64,
        max_score: f64,
    ) -> Result<Vec<String>, StoreError> {
        self.inner.history_range(meter_id, min_score, max_score).await
    }
    async fn history_latest(&self, meter_id: &str) -> Result<Option<String>, StoreError> {
        self.inner.history_latest(meter_id).await
    }
    async fn trim_history_before(
        &self,
        meter_id: &str,
        cutoff_score: f64,
    ) -> Result<u64, StoreError> {
        self.inner.trim_history_before(meter_id, cutoff_score).await
    }
    async fn pending_items(&self, meter_id: &str) -> Result<Vec<String>, StoreError> {
        self.inner.pending_items(meter_id).await
    }
    async fn delete_pending(&self, meter_id: &str) -> Result<(), StoreError> {
        self.inner.delete_pending(meter_id).await
    }
    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.inner.scan_keys(pattern).await
    }
    async fn set_backup_entry(
        &self,
        date: &str,
        meter_id: &str,
        usage: f64,
    ) -> Result<(), StoreError> {
        self.inner.set_backup_entry(date, meter_id, usage).await
    }
    async fn backup_entries(&self, date: &str) -> Result<HashMap<String, f64>, StoreError> {
        self.inner.backup_entries(date).await
    }
    async fn append_log(&self, kind: &str, entry: &str) -> Result<(), StoreError> {
        self.inner.append_log(kind, entry).await
    }
    async fn recent_logs(&self, kind: &str, limit: usize) -> Result<Vec<String>, StoreError> {
        self.inner.recent_logs(kind, limit).await
    }
    async fn acquire_meter_lock(
        &self,
        meter_id: &str,
        acquire_timeout: Duration,
        hold_timeout: Duration,
    ) -> Result<Option<MeterLock>, StoreError> {
        self.inner
            .acquire_meter_lock(meter_id, acquire_timeout, hold_timeout)
            .await
    }
    async fn release_meter_lock(&self, lock: &MeterLock) -> Result<(), StoreError> {
        self.inner.release_meter_lock(lock).await
    }
    async fn set_maintenance(&self, ttl: Duration) -> Result<bool, StoreError> {
        self.inner.set_maintenance(ttl).await
    }
    async fn clear_maintenance(&self) -> Result<(), StoreError> {
        self.inner.clear_maintenance().await
    }
    async fn maintenance_active(&self) -> Result<bool, StoreError> {
        self.inner.maintenance_active().await
    }
}

/// Drain work queue then retry queue once, like an idle worker iteration.
async fn drain_with_retries(store: &dyn MeterStore, metrics: &PipelineMetrics) {
    let config = pipeline_config();
    drain_work_queue(store, metrics).await;
    let retries = store.pop_retry_batch(config.batch_size).await.unwrap();
    if !retries.is_empty() {
        process_batch(store, &config, metrics, retries).await;
    }
}

#[tokio::test]
async fn test_transient_failure_recovers_via_retry_queue() {
    let store = FlakyStore::failing(1);
    let metrics = PipelineMetrics::new();
    store
        .enqueue_readings(&[payload(METER, "2025-02-20T10:00:00", 100.0)])
        .await
        .unwrap();

    // First pass fails the apply and routes the payload to retry.
    drain_work_queue(&store, &metrics).await;
    assert_eq!(store.queue_depths().await.unwrap().retry, 1);
    assert!(history(&store, METER).await.is_empty());

    // Second pass drains the retry queue; the fingerprint was rolled
    // back, so the apply goes through.
    drain_with_retries(&store, &metrics).await;
    assert_eq!(store.queue_depths().await.unwrap().retry, 0);
    assert_eq!(history(&store, METER).await.len(), 1);
    assert_eq!(metrics.snapshot().retried, 1);
    assert_eq!(metrics.snapshot().processed, 1);
}

#[tokio::test]
async fn test_exhausted_retries_dead_letter() {
    // Fails forever: 1 initial attempt + MAX_RETRIES redeliveries.
    let store = FlakyStore::failing(u32::MAX);
    let metrics = PipelineMetrics::new();
    store
        .enqueue_readings(&[payload(METER, "2025-02-20T10:00:00", 100.0)])
        .await
        .unwrap();

    for _ in 0..5 {
        drain_with_retries(&store, &metrics).await;
    }

    let depths = store.queue_depths().await.unwrap();
    assert_eq!(depths.retry, 0);
    assert_eq!(depths.dead_letter, 1);
    assert!(history(&store, METER).await.is_empty());
    assert_eq!(metrics.snapshot().dead_lettered, 1);
}

// ── Parse failures are dropped without poisoning the batch ───────

#[tokio::test]
async fn test_unparseable_payload_dropped_rest_applied() {
    let store = MemoryStore::new();
    let metrics = PipelineMetrics::new();
    store
        .enqueue_readings(&[
            "not json at all".to_string(),
            payload(METER, "2025-02-20T10:00:00", 100.0),
        ])
        .await
        .unwrap();
    drain_work_queue(&store, &metrics).await;

    assert_eq!(history(&store, METER).await.len(), 1);
    assert_eq!(metrics.snapshot().parse_failures, 1);
    assert_eq!(metrics.snapshot().processed, 1);

    // The drop was recorded in the worker log stream.
    let logs = store.recent_logs("background_worker", 10).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].contains("unparseable"));
}
