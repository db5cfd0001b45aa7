//! Background worker pool.
//!
//! N cooperating workers drain the work queue in bounded batches, group
//! readings by meter, serialize per-meter updates behind a store-side
//! lock, and apply each reading through the atomic delta path. Delivery
//! is at-least-once; the fingerprint set makes the apply idempotent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use wattline_core::config::PipelineConfig;
use wattline_store::log::log_event;
use wattline_store::{MeterStore, StoreError};

use crate::apply::{apply_reading, ApplyOutcome};
use crate::metrics::PipelineMetrics;
use crate::parser::{parse_batch, ParsedReading};

/// How long a worker waits for a contended meter lock before deferring
/// the group to a later batch.
const LOCK_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);

/// Lock self-release horizon; bounds the damage of a crashed holder.
const LOCK_HOLD_TIMEOUT: Duration = Duration::from_secs(5);

/// Base delay between attempts after a queue pop fails.
const ERROR_BACKOFF_BASE: Duration = Duration::from_millis(200);

/// Cap for the exponential pop-error backoff.
const MAX_ERROR_BACKOFF: Duration = Duration::from_secs(30);

/// Store log stream the workers report into.
const LOG_KIND: &str = "background_worker";

pub struct WorkerPool {
    store: Arc<dyn MeterStore>,
    config: PipelineConfig,
    metrics: Arc<PipelineMetrics>,
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn MeterStore>,
        config: PipelineConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            store,
            config,
            metrics,
            stop: Arc::new(AtomicBool::new(false)),
            handles: Vec::new(),
        }
    }

    /// Launch `n` workers. Tasks run until [`stop`](Self::stop).
    pub fn start(&mut self, n: usize) {
        info!(workers = n, "starting worker pool");
        for worker_id in 0..n {
            let store = self.store.clone();
            let config = self.config.clone();
            let metrics = self.metrics.clone();
            let stop = self.stop.clone();
            self.handles
                .push(tokio::spawn(worker_loop(worker_id, store, config, metrics, stop)));
        }
    }

    /// Signal workers to exit after their current batch and wait for them.
    pub async fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!(error = %e, "worker task failed");
            }
        }
        info!("worker pool stopped");
    }
}

async fn worker_loop(
    worker_id: usize,
    store: Arc<dyn MeterStore>,
    config: PipelineConfig,
    metrics: Arc<PipelineMetrics>,
    stop: Arc<AtomicBool>,
) {
    info!(worker_id, "worker started");
    let pop_timeout = Duration::from_millis(config.pop_timeout_ms);
    let mut consecutive_errors: u32 = 0;

    while !stop.load(Ordering::Relaxed) {
        let batch = match store.pop_reading_batch(config.batch_size, pop_timeout).await {
            Ok(batch) => {
                consecutive_errors = 0;
                batch
            }
            Err(e) => {
                consecutive_errors += 1;
                warn!(worker_id, error = %e, consecutive_errors, "queue pop failed");
                let backoff = ERROR_BACKOFF_BASE * 2u32.pow(consecutive_errors.min(7));
                tokio::time::sleep(backoff.min(MAX_ERROR_BACKOFF)).await;
                continue;
            }
        };

        // Work queue idle — give deferred payloads a turn.
        let batch = if batch.is_empty() {
            match store.pop_retry_batch(config.batch_size).await {
                Ok(retries) => retries,
                Err(e) => {
                    warn!(worker_id, error = %e, "retry queue pop failed");
                    Vec::new()
                }
            }
        } else {
            batch
        };

        if batch.is_empty() {
            // The blocking pop already waited out its timeout.
            continue;
        }

        process_batch(store.as_ref(), &config, &metrics, batch).await;
    }
    info!(worker_id, "worker stopped");
}

/// Process one drained batch: parse, group by meter, apply per group.
/// Also usable on its own to drain a queue synchronously, without a pool.
pub async fn process_batch(
    store: &dyn MeterStore,
    config: &PipelineConfig,
    metrics: &PipelineMetrics,
    batch: Vec<String>,
) {
    metrics.add(&metrics.received, batch.len() as u64);
    metrics.add(&metrics.batches, 1);

    let (parsed, failures) = parse_batch(batch);
    for (raw, error) in &failures {
        // The fingerprint is deliberately not recorded, so upstream can
        // re-deliver a corrected payload.
        metrics.add(&metrics.parse_failures, 1);
        log_event(
            store,
            LOG_KIND,
            format!(
                "Dropped unparseable record: {error} | Metadata: {}",
                payload_metadata(raw)
            ),
        )
        .await;
    }

    for (meter_id, group) in group_by_meter(parsed) {
        process_meter_group(store, config, metrics, &meter_id, group).await;
    }
}

/// Group parsed readings by meter, each group sorted ascending by
/// timestamp (ties broken by payload for determinism).
pub fn group_by_meter(parsed: Vec<ParsedReading>) -> HashMap<String, Vec<ParsedReading>> {
    let mut groups: HashMap<String, Vec<ParsedReading>> = HashMap::new();
    for item in parsed {
        groups.entry(item.reading.meter_id.clone()).or_default().push(item);
    }
    for group in groups.values_mut() {
        group.sort_by(|a, b| a.score.total_cmp(&b.score).then_with(|| a.raw.cmp(&b.raw)));
    }
    groups
}

async fn process_meter_group(
    store: &dyn MeterStore,
    config: &PipelineConfig,
    metrics: &PipelineMetrics,
    meter_id: &str,
    group: Vec<ParsedReading>,
) {
    let lock = match store
        .acquire_meter_lock(meter_id, LOCK_ACQUIRE_TIMEOUT, LOCK_HOLD_TIMEOUT)
        .await
    {
        Ok(Some(lock)) => lock,
        Ok(None) => {
            defer_group(store, meter_id, &group, "lock contended").await;
            return;
        }
        Err(e) => {
            warn!(meter_id = %meter_id, error = %e, "lock acquisition failed");
            defer_group(store, meter_id, &group, "lock error").await;
            return;
        }
    };

    for item in &group {
        match apply_reading(store, item).await {
            Ok(ApplyOutcome::Applied { .. }) => metrics.add(&metrics.processed, 1),
            Ok(ApplyOutcome::Duplicate) => metrics.add(&metrics.deduplicated, 1),
            Err(e) => handle_apply_failure(store, config, metrics, item, e).await,
        }
    }

    if let Err(e) = store.release_meter_lock(&lock).await {
        warn!(meter_id = %meter_id, error = %e, "failed to release meter lock");
    }
}

/// Push a group back onto the work queue tail for a later batch.
async fn defer_group(store: &dyn MeterStore, meter_id: &str, group: &[ParsedReading], why: &str) {
    warn!(meter_id = %meter_id, items = group.len(), "deferring group: {why}");
    let raws: Vec<String> = group.iter().map(|item| item.raw.clone()).collect();
    if let Err(e) = store.enqueue_readings(&raws).await {
        warn!(meter_id = %meter_id, error = %e, "failed to requeue deferred group");
    }
}

/// Route an apply failure into the retry channel: bounded retries, then
/// the dead-letter list.
async fn handle_apply_failure(
    store: &dyn MeterStore,
    config: &PipelineConfig,
    metrics: &PipelineMetrics,
    item: &ParsedReading,
    error: StoreError,
) {
    log_event(
        store,
        LOG_KIND,
        format!(
            "Failed to process record: {error} | Metadata: meter_id={}, ts={}",
            item.reading.meter_id, item.reading.timestamp
        ),
    )
    .await;

    let attempts = match store.bump_retry_count(&item.raw).await {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "failed to bump retry count");
            return;
        }
    };

    if attempts <= config.max_retries {
        metrics.add(&metrics.retried, 1);
        if let Err(e) = store.push_retry(&item.raw).await {
            warn!(error = %e, "failed to push payload to retry queue");
        }
    } else {
        metrics.add(&metrics.dead_lettered, 1);
        if let Err(e) = store.push_dead_letter(&item.raw).await {
            warn!(error = %e, "failed to push payload to dead letter");
            return;
        }
        if let Err(e) = store.clear_retry_count(&item.raw).await {
            warn!(error = %e, "failed to clear retry count");
        }
    }
}

/// Best-effort metadata for failure logs: identifies the record without
/// reproducing the whole payload.
fn payload_metadata(raw: &str) -> String {
    let value: serde_json::Value = serde_json::from_str(raw).unwrap_or_default();
    let meter_id = value
        .get("meter_id")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    let timestamp = value
        .get("timestamp")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    format!("meter_id={meter_id}, ts={timestamp}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_payload;

    fn payload(meter_id: &str, ts: &str, value: f64) -> String {
        format!(r#"{{"meter_id":"{meter_id}","timestamp":"{ts}","reading":{value}}}"#)
    }

    #[test]
    fn test_group_by_meter_sorts_each_group() {
        let parsed = vec![
            parse_payload(&payload("100000001", "2025-02-20T12:00:00", 110.0)).unwrap(),
            parse_payload(&payload("100000002", "2025-02-20T09:00:00", 50.0)).unwrap(),
            parse_payload(&payload("100000001", "2025-02-20T11:30:00", 107.0)).unwrap(),
        ];
        let groups = group_by_meter(parsed);
        assert_eq!(groups.len(), 2);

        let first = &groups["100000001"];
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].reading.reading, 107.0);
        assert_eq!(first[1].reading.reading, 110.0);
    }

    #[test]
    fn test_payload_metadata() {
        let raw = payload("100000001", "2025-02-20T10:00:00", 1.0);
        assert_eq!(
            payload_metadata(&raw),
            "meter_id=100000001, ts=2025-02-20T10:00:00"
        );
        assert_eq!(payload_metadata("garbage"), "meter_id=unknown, ts=unknown");
    }
}
