//! In-memory store backend.
//!
//! Mirrors the Redis backend's semantics (blocking pop, atomic append,
//! token-checked locks, flag TTL) behind a single state mutex. Used for
//! dependency-free development and as the substrate for the test suites.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::StoreError;
use crate::keys;
use crate::store::{MeterLock, MeterStore, QueueDepths};

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(25);
const LOG_MAX_LEN: usize = 1000;

#[derive(Default)]
struct MemoryInner {
    registry: HashSet<String>,
    work_queue: VecDeque<String>,
    retry_queue: VecDeque<String>,
    dead_letter: VecDeque<String>,
    retry_counts: HashMap<String, u32>,
    processed: HashSet<String>,
    last_readings: HashMap<String, f64>,
    /// meter id -> (record JSON -> score). Range reads sort by
    /// (score, member) to match sorted-set ordering.
    histories: HashMap<String, HashMap<String, f64>>,
    pending: HashMap<String, VecDeque<String>>,
    backups: HashMap<String, HashMap<String, f64>>,
    logs: HashMap<String, VecDeque<String>>,
    locks: HashMap<String, (String, Instant)>,
    maintenance_until: Option<Instant>,
}

impl MemoryInner {
    fn sorted_history(&self, meter_id: &str, min: f64, max: f64) -> Vec<String> {
        let Some(history) = self.histories.get(meter_id) else {
            return Vec::new();
        };
        let mut entries: Vec<(&f64, &String)> = history
            .iter()
            .filter(|(_, score)| **score >= min && **score <= max)
            .map(|(member, score)| (score, member))
            .collect();
        entries.sort_by(|a, b| a.0.total_cmp(b.0).then_with(|| a.1.cmp(b.1)));
        entries.into_iter().map(|(_, member)| member.clone()).collect()
    }

    fn all_keys(&self) -> Vec<String> {
        let mut all = Vec::new();
        all.extend(self.histories.keys().map(|id| keys::history(id)));
        all.extend(
            self.pending
                .iter()
                .filter(|(_, items)| !items.is_empty())
                .map(|(id, _)| keys::pending(id)),
        );
        all.extend(self.backups.keys().map(|date| keys::backup(date)));
        all
    }
}

/// Match a key against a glob pattern with at most one `*`.
fn key_matches(pattern: &str, key: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == key,
        Some((prefix, suffix)) => {
            key.len() >= prefix.len() + suffix.len()
                && key.starts_with(prefix)
                && key.ends_with(suffix)
        }
    }
}

pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    queue_signal: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
            queue_signal: Notify::new(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MeterStore for MemoryStore {
    async fn register_meter(&self, meter_id: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.registry.insert(meter_id.to_string()))
    }

    async fn is_registered(&self, meter_id: &str) -> Result<bool, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.registry.contains(meter_id))
    }

    async fn enqueue_readings(&self, payloads: &[String]) -> Result<(), StoreError> {
        if payloads.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        inner.work_queue.extend(payloads.iter().cloned());
        drop(inner);
        self.queue_signal.notify_waiters();
        Ok(())
    }

    async fn enqueue_pending(&self, meter_id: &str, payloads: &[String]) -> Result<(), StoreError> {
        if payloads.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        inner
            .pending
            .entry(meter_id.to_string())
            .or_default()
            .extend(payloads.iter().cloned());
        Ok(())
    }

    async fn pop_reading_batch(
        &self,
        max: usize,
        timeout: Duration,
    ) -> Result<Vec<String>, StoreError> {
        if max == 0 {
            return Ok(Vec::new());
        }
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.queue_signal.notified();
            {
                let mut inner = self.inner.lock().await;
                if !inner.work_queue.is_empty() {
                    let take = max.min(inner.work_queue.len());
                    return Ok(inner.work_queue.drain(..take).collect());
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep(deadline - now) => {}
            }
        }
    }

    async fn pop_retry_batch(&self, max: usize) -> Result<Vec<String>, StoreError> {
        let mut inner = self.inner.lock().await;
        let take = max.min(inner.retry_queue.len());
        Ok(inner.retry_queue.drain(..take).collect())
    }

    async fn queue_depths(&self) -> Result<QueueDepths, StoreError> {
        let inner = self.inner.lock().await;
        Ok(QueueDepths {
            work: inner.work_queue.len() as u64,
            retry: inner.retry_queue.len() as u64,
            dead_letter: inner.dead_letter.len() as u64,
        })
    }

    async fn bump_retry_count(&self, payload: &str) -> Result<u32, StoreError> {
        let mut inner = self.inner.lock().await;
        let count = inner.retry_counts.entry(payload.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    async fn clear_retry_count(&self, payload: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.retry_counts.remove(payload);
        Ok(())
    }

    async fn push_retry(&self, payload: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.retry_queue.push_back(payload.to_string());
        Ok(())
    }

    async fn push_dead_letter(&self, payload: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.dead_letter.push_back(payload.to_string());
        Ok(())
    }

    async fn mark_processed(&self, fingerprint: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        Ok(inner.processed.insert(fingerprint.to_string()))
    }

    async fn unmark_processed(&self, fingerprint: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.processed.remove(fingerprint);
        Ok(())
    }

    async fn append_history_atomic(
        &self,
        meter_id: &str,
        reading_value: f64,
        score: f64,
        record_prefix: &str,
    ) -> Result<f64, StoreError> {
        let mut inner = self.inner.lock().await;
        let consumption = match inner.last_readings.get(meter_id) {
            Some(last) => reading_value - last,
            None => 0.0,
        };
        inner.last_readings.insert(meter_id.to_string(), reading_value);
        let member = format!("{record_prefix}{consumption}}}");
        inner
            .histories
            .entry(meter_id.to_string())
            .or_default()
            .insert(member, score);
        Ok(consumption)
    }

    async fn history_range(
        &self,
        meter_id: &str,
        min_score: f64,
        max_score: f64,
    ) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.sorted_history(meter_id, min_score, max_score))
    }

    async fn history_latest(&self, meter_id: &str) -> Result<Option<String>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .sorted_history(meter_id, f64::NEG_INFINITY, f64::INFINITY)
            .pop())
    }

    async fn trim_history_before(
        &self,
        meter_id: &str,
        cutoff_score: f64,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().await;
        let Some(history) = inner.histories.get_mut(meter_id) else {
            return Ok(0);
        };
        let before = history.len();
        history.retain(|_, score| *score > cutoff_score);
        Ok((before - history.len()) as u64)
    }

    async fn pending_items(&self, meter_id: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .pending
            .get(meter_id)
            .map(|items| items.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn delete_pending(&self, meter_id: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.pending.remove(meter_id);
        Ok(())
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .all_keys()
            .into_iter()
            .filter(|key| key_matches(pattern, key))
            .collect())
    }

    async fn set_backup_entry(
        &self,
        date: &str,
        meter_id: &str,
        usage: f64,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner
            .backups
            .entry(date.to_string())
            .or_default()
            .insert(meter_id.to_string(), usage);
        Ok(())
    }

    async fn backup_entries(&self, date: &str) -> Result<HashMap<String, f64>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.backups.get(date).cloned().unwrap_or_default())
    }

    async fn append_log(&self, kind: &str, entry: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        let stream = inner.logs.entry(kind.to_string()).or_default();
        stream.push_back(entry.to_string());
        while stream.len() > LOG_MAX_LEN {
            stream.pop_front();
        }
        Ok(())
    }

    async fn recent_logs(&self, kind: &str, limit: usize) -> Result<Vec<String>, StoreError> {
        let inner = self.inner.lock().await;
        let Some(stream) = inner.logs.get(kind) else {
            return Ok(Vec::new());
        };
        let skip = stream.len().saturating_sub(limit);
        Ok(stream.iter().skip(skip).cloned().collect())
    }

    async fn acquire_meter_lock(
        &self,
        meter_id: &str,
        acquire_timeout: Duration,
        hold_timeout: Duration,
    ) -> Result<Option<MeterLock>, StoreError> {
        let token = Uuid::new_v4().to_string();
        let deadline = Instant::now() + acquire_timeout;
        loop {
            {
                let mut inner = self.inner.lock().await;
                let now = Instant::now();
                let free = match inner.locks.get(meter_id) {
                    None => true,
                    Some((_, expires)) => *expires <= now,
                };
                if free {
                    inner
                        .locks
                        .insert(meter_id.to_string(), (token.clone(), now + hold_timeout));
                    return Ok(Some(MeterLock {
                        meter_id: meter_id.to_string(),
                        token,
                    }));
                }
            }
            if Instant::now() + LOCK_RETRY_INTERVAL > deadline {
                return Ok(None);
            }
            tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
        }
    }

    async fn release_meter_lock(&self, lock: &MeterLock) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some((token, _)) = inner.locks.get(&lock.meter_id) {
            if *token == lock.token {
                inner.locks.remove(&lock.meter_id);
            }
        }
        Ok(())
    }

    async fn set_maintenance(&self, ttl: Duration) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        if matches!(inner.maintenance_until, Some(until) if until > now) {
            return Ok(false);
        }
        inner.maintenance_until = Some(now + ttl);
        Ok(true)
    }

    async fn clear_maintenance(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.maintenance_until = None;
        Ok(())
    }

    async fn maintenance_active(&self) -> Result<bool, StoreError> {
        let inner = self.inner.lock().await;
        Ok(matches!(inner.maintenance_until, Some(until) if until > Instant::now()))
    }
}
