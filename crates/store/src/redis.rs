//! Redis store backend.
//!
//! One multiplexed async connection shared by all components; the
//! consumption derivation runs server-side as a Lua script so concurrent
//! writers cannot observe a half-applied last-reading/history pair.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use ::redis::aio::MultiplexedConnection;
use ::redis::{cmd, pipe, AsyncCommands, Script};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::keys;
use crate::store::{MeterLock, MeterStore, QueueDepths};

/// Derive the consumption delta and append the completed history record
/// as one atomic unit. KEYS: last-reading key, history key. ARGV: new
/// reading, unix score, record JSON up to the consumption value.
const APPEND_SCRIPT: &str = r#"
local last = redis.call('GET', KEYS[1])
local reading = tonumber(ARGV[1])
local consumption = 0
if last then
    consumption = reading - tonumber(last)
end
redis.call('SET', KEYS[1], ARGV[1])
local member = ARGV[3] .. tostring(consumption) .. '}'
redis.call('ZADD', KEYS[2], ARGV[2], member)
return tostring(consumption)
"#;

/// Token-checked lock release: only the holder that set the key may
/// delete it, so a lock reclaimed after its hold timeout is not clobbered.
const UNLOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// How long to back off between lock acquisition attempts.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Log streams are trimmed to this many most-recent entries.
const LOG_MAX_LEN: isize = 1000;

pub struct RedisStore {
    conn: MultiplexedConnection,
    append_script: Script,
    unlock_script: Script,
}

impl RedisStore {
    /// Connect to the store at `url` (e.g. `redis://localhost:6379/`).
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = ::redis::Client::open(url)
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        info!(url = %url, "store connected");
        Ok(Self {
            conn,
            append_script: Script::new(APPEND_SCRIPT),
            unlock_script: Script::new(UNLOCK_SCRIPT),
        })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }
}

#[async_trait]
impl MeterStore for RedisStore {
    async fn register_meter(&self, meter_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let added: i64 = conn.hset_nx(keys::REGISTRY, meter_id, 1).await?;
        Ok(added == 1)
    }

    async fn is_registered(&self, meter_id: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        Ok(conn.hexists(keys::REGISTRY, meter_id).await?)
    }

    async fn enqueue_readings(&self, payloads: &[String]) -> Result<(), StoreError> {
        if payloads.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let _: i64 = conn.rpush(keys::WORK_QUEUE, payloads).await?;
        Ok(())
    }

    async fn enqueue_pending(&self, meter_id: &str, payloads: &[String]) -> Result<(), StoreError> {
        if payloads.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let _: i64 = conn.rpush(keys::pending(meter_id), payloads).await?;
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
        let mut conn = self.conn();
        // Block for the first item only; the rest of the batch is whatever
        // is already queued behind it.
        let first: Option<(String, String)> =
            conn.blpop(keys::WORK_QUEUE, timeout.as_secs_f64()).await?;
        let Some((_, first)) = first else {
            return Ok(Vec::new());
        };
        let mut batch = vec![first];
        if let Some(rest_count) = NonZeroUsize::new(max - 1) {
            let rest: Vec<String> = conn.lpop(keys::WORK_QUEUE, Some(rest_count)).await?;
            batch.extend(rest);
        }
        Ok(batch)
    }

    async fn pop_retry_batch(&self, max: usize) -> Result<Vec<String>, StoreError> {
        let Some(count) = NonZeroUsize::new(max) else {
            return Ok(Vec::new());
        };
        let mut conn = self.conn();
        let items: Vec<String> = conn.lpop(keys::RETRY_QUEUE, Some(count)).await?;
        Ok(items)
    }

    async fn queue_depths(&self) -> Result<QueueDepths, StoreError> {
        let mut conn = self.conn();
        let (work, retry, dead_letter): (u64, u64, u64) = pipe()
            .llen(keys::WORK_QUEUE)
            .llen(keys::RETRY_QUEUE)
            .llen(keys::DEAD_LETTER)
            .query_async(&mut conn)
            .await?;
        Ok(QueueDepths { work, retry, dead_letter })
    }

    async fn bump_retry_count(&self, payload: &str) -> Result<u32, StoreError> {
        let mut conn = self.conn();
        let count: f64 = conn.zincr(keys::RETRY_COUNTS, payload, 1f64).await?;
        Ok(count as u32)
    }

    async fn clear_retry_count(&self, payload: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: i64 = conn.zrem(keys::RETRY_COUNTS, payload).await?;
        Ok(())
    }

    async fn push_retry(&self, payload: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: i64 = conn.rpush(keys::RETRY_QUEUE, payload).await?;
        Ok(())
    }

    async fn push_dead_letter(&self, payload: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: i64 = conn.rpush(keys::DEAD_LETTER, payload).await?;
        Ok(())
    }

    async fn mark_processed(&self, fingerprint: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let added: i64 = conn.sadd(keys::PROCESSED_SET, fingerprint).await?;
        Ok(added == 1)
    }

    async fn unmark_processed(&self, fingerprint: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: i64 = conn.srem(keys::PROCESSED_SET, fingerprint).await?;
        Ok(())
    }

    async fn append_history_atomic(
        &self,
        meter_id: &str,
        reading_value: f64,
        score: f64,
        record_prefix: &str,
    ) -> Result<f64, StoreError> {
        let mut conn = self.conn();
        let raw: String = self
            .append_script
            .key(keys::last_reading(meter_id))
            .key(keys::history(meter_id))
            .arg(reading_value)
            .arg(score)
            .arg(record_prefix)
            .invoke_async(&mut conn)
            .await?;
        raw.parse::<f64>()
            .map_err(|e| StoreError::Script(format!("non-numeric consumption '{raw}': {e}")))
    }

    async fn history_range(
        &self,
        meter_id: &str,
        min_score: f64,
        max_score: f64,
    ) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn();
        Ok(conn
            .zrangebyscore(keys::history(meter_id), min_score, max_score)
            .await?)
    }

    async fn history_latest(&self, meter_id: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn();
        let mut newest: Vec<String> = conn.zrevrange(keys::history(meter_id), 0, 0).await?;
        Ok(newest.pop())
    }

    async fn trim_history_before(
        &self,
        meter_id: &str,
        cutoff_score: f64,
    ) -> Result<u64, StoreError> {
        let mut conn = self.conn();
        let removed: u64 = conn
            .zrembyscore(keys::history(meter_id), "-inf", cutoff_score)
            .await?;
        Ok(removed)
    }

    async fn pending_items(&self, meter_id: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn();
        Ok(conn.lrange(keys::pending(meter_id), 0, -1).await?)
    }

    async fn delete_pending(&self, meter_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: i64 = conn.del(keys::pending(meter_id)).await?;
        Ok(())
    }

    async fn scan_keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn();
        let mut found = Vec::new();
        let mut iter = conn.scan_match::<_, String>(pattern).await?;
        while let Some(key) = iter.next_item().await {
            found.push(key);
        }
        Ok(found)
    }

    async fn set_backup_entry(
        &self,
        date: &str,
        meter_id: &str,
        usage: f64,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: i64 = conn.hset(keys::backup(date), meter_id, usage).await?;
        Ok(())
    }

    async fn backup_entries(&self, date: &str) -> Result<HashMap<String, f64>, StoreError> {
        let mut conn = self.conn();
        let raw: HashMap<String, String> = conn.hgetall(keys::backup(date)).await?;
        Ok(raw
            .into_iter()
            .map(|(meter_id, usage)| (meter_id, usage.parse().unwrap_or(0.0)))
            .collect())
    }

    async fn append_log(&self, kind: &str, entry: &str) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let key = keys::logs(kind);
        let _: () = pipe()
            .rpush(&key, entry)
            .ignore()
            .ltrim(&key, -LOG_MAX_LEN, -1)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn recent_logs(&self, kind: &str, limit: usize) -> Result<Vec<String>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn();
        Ok(conn
            .lrange(keys::logs(kind), -(limit as isize), -1)
            .await?)
    }

    async fn acquire_meter_lock(
        &self,
        meter_id: &str,
        acquire_timeout: Duration,
        hold_timeout: Duration,
    ) -> Result<Option<MeterLock>, StoreError> {
        let key = keys::meter_lock(meter_id);
        let token = Uuid::new_v4().to_string();
        let deadline = tokio::time::Instant::now() + acquire_timeout;
        let mut conn = self.conn();
        loop {
            let acquired: Option<String> = cmd("SET")
                .arg(&key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(hold_timeout.as_millis() as u64)
                .query_async(&mut conn)
                .await?;
            if acquired.is_some() {
                return Ok(Some(MeterLock {
                    meter_id: meter_id.to_string(),
                    token,
                }));
            }
            if tokio::time::Instant::now() + LOCK_RETRY_INTERVAL > deadline {
                debug!(meter_id = %meter_id, "meter lock contended past acquire timeout");
                return Ok(None);
            }
            tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
        }
    }

    async fn release_meter_lock(&self, lock: &MeterLock) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: i64 = self
            .unlock_script
            .key(keys::meter_lock(&lock.meter_id))
            .arg(&lock.token)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_maintenance(&self, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        let set: Option<String> = cmd("SET")
            .arg(keys::MAINTENANCE_FLAG)
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(set.is_some())
    }

    async fn clear_maintenance(&self) -> Result<(), StoreError> {
        let mut conn = self.conn();
        let _: i64 = conn.del(keys::MAINTENANCE_FLAG).await?;
        Ok(())
    }

    async fn maintenance_active(&self) -> Result<bool, StoreError> {
        let mut conn = self.conn();
        Ok(conn.exists(keys::MAINTENANCE_FLAG).await?)
    }
}
