//! Maintenance driver: daily rollup, retention trim, pending drain.
//!
//! Triggered once per day by the maintenance control endpoint. The whole
//! sequence runs on a background task; the control request returns as soon
//! as the flag is set. Stages: rollup yesterday's consumption into the
//! daily backup hash, trim history past the retention horizon, wait out
//! the maintenance window, then replay each meter's pending list through
//! the same atomic apply path the workers use.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveTime, TimeZone, Utc};
use tracing::{info, warn};

use wattline_core::config::MaintenanceConfig;
use wattline_core::reading::HistoryRecord;
use wattline_store::log::log_event;
use wattline_store::{keys, MeterStore, StoreError};

use crate::apply::apply_reading;
use crate::parser::parse_batch;

/// Store log stream for maintenance events.
const LOG_KIND: &str = "daily_jobs";

#[derive(Clone)]
pub struct MaintenanceDriver {
    store: Arc<dyn MeterStore>,
    config: MaintenanceConfig,
}

impl MaintenanceDriver {
    pub fn new(store: Arc<dyn MeterStore>, config: MaintenanceConfig) -> Self {
        Self { store, config }
    }

    /// Enter maintenance and spawn the driver task. Returns `false` when
    /// maintenance is already active (nothing is spawned).
    ///
    /// The flag TTL equals the maintenance window, so a crashed driver
    /// self-clears and the next trigger re-runs the whole sequence.
    pub async fn trigger(&self) -> Result<bool, StoreError> {
        let ttl = Duration::from_secs(self.config.duration_secs);
        if !self.store.set_maintenance(ttl).await? {
            return Ok(false);
        }
        log_event(self.store.as_ref(), LOG_KIND, "Entering maintenance mode").await;
        let driver = self.clone();
        tokio::spawn(async move { driver.run().await });
        Ok(true)
    }

    /// Run the full sequence. The flag is cleared on the way out even when
    /// a stage fails.
    pub async fn run(&self) {
        if let Err(e) = self.run_stages().await {
            warn!(error = %e, "maintenance stage failed");
            log_event(
                self.store.as_ref(),
                LOG_KIND,
                format!("Maintenance aborted: {e}"),
            )
            .await;
        }
        if let Err(e) = self.store.clear_maintenance().await {
            warn!(error = %e, "failed to clear maintenance flag");
        }
        log_event(self.store.as_ref(), LOG_KIND, "Maintenance done").await;
    }

    async fn run_stages(&self) -> Result<(), StoreError> {
        self.rollup_yesterday().await?;
        self.trim_history().await?;
        // Hold the window open; ingress keeps quarantining into pending.
        tokio::time::sleep(Duration::from_secs(self.config.duration_secs)).await;
        self.drain_pending().await?;
        Ok(())
    }

    /// Roll up yesterday's (UTC) consumption per meter into the daily
    /// backup hash.
    pub async fn rollup_yesterday(&self) -> Result<usize, StoreError> {
        let yesterday = (Utc::now() - ChronoDuration::days(1)).date_naive();
        self.rollup_date(yesterday).await
    }

    /// Roll up one UTC calendar date. Split out so the close-of-books can
    /// be driven for an explicit date.
    pub async fn rollup_date(&self, date: NaiveDate) -> Result<usize, StoreError> {
        let start = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
        let start_ts = start.timestamp() as f64;
        let end_ts = start_ts + 86_400.0;
        let date_str = date.to_string();

        let mut meters = 0usize;
        for key in self.store.scan_keys(keys::HISTORY_PATTERN).await? {
            let Some(meter_id) = keys::meter_id_from_key(&key) else {
                continue;
            };
            let records = self.store.history_range(meter_id, start_ts, end_ts).await?;
            if records.is_empty() {
                continue;
            }
            let total: f64 = records
                .iter()
                .filter_map(|raw| match serde_json::from_str::<HistoryRecord>(raw) {
                    Ok(record) => Some(record.consumption),
                    Err(e) => {
                        warn!(meter_id = %meter_id, error = %e, "skipping unparseable history record");
                        None
                    }
                })
                .sum();
            self.store.set_backup_entry(&date_str, meter_id, total).await?;
            meters += 1;
        }

        info!(date = %date_str, meters, "daily rollup complete");
        log_event(
            self.store.as_ref(),
            LOG_KIND,
            format!("Backed up readings of {meters} meter(s) for {date_str}"),
        )
        .await;
        Ok(meters)
    }

    /// Drop history records older than the retention horizon. Returns the
    /// number of records removed across all meters.
    pub async fn trim_history(&self) -> Result<u64, StoreError> {
        let cutoff = Utc::now().timestamp() as f64 - self.config.keep_days as f64 * 86_400.0;
        let mut removed = 0u64;
        for key in self.store.scan_keys(keys::HISTORY_PATTERN).await? {
            let Some(meter_id) = keys::meter_id_from_key(&key) else {
                continue;
            };
            removed += self.store.trim_history_before(meter_id, cutoff).await?;
        }

        info!(removed, keep_days = self.config.keep_days, "retention trim complete");
        log_event(
            self.store.as_ref(),
            LOG_KIND,
            format!(
                "Deleted {removed} record(s) older than {} days",
                self.config.keep_days
            ),
        )
        .await;
        Ok(removed)
    }

    /// Replay every meter's pending list into history, in list order,
    /// through the same atomic apply path the workers use, then delete
    /// the list. Returns the number of meters drained.
    pub async fn drain_pending(&self) -> Result<usize, StoreError> {
        let mut meters = 0usize;
        for key in self.store.scan_keys(keys::PENDING_PATTERN).await? {
            let Some(meter_id) = keys::meter_id_from_key(&key) else {
                continue;
            };
            let items = self.store.pending_items(meter_id).await?;
            if items.is_empty() {
                self.store.delete_pending(meter_id).await?;
                continue;
            }

            let (parsed, failures) = parse_batch(items);
            for (_, error) in &failures {
                log_event(
                    self.store.as_ref(),
                    LOG_KIND,
                    format!("Dropped unparseable pending record for {meter_id}: {error}"),
                )
                .await;
            }
            for item in &parsed {
                if let Err(e) = apply_reading(self.store.as_ref(), item).await {
                    // The payload stays lost from pending's point of view,
                    // but the fingerprint was rolled back, so an upstream
                    // redelivery will still land.
                    warn!(meter_id = %meter_id, error = %e, "failed to apply pending record");
                    log_event(
                        self.store.as_ref(),
                        LOG_KIND,
                        format!("Failed to apply pending record for {meter_id}: {e}"),
                    )
                    .await;
                }
            }
            self.store.delete_pending(meter_id).await?;
            meters += 1;
        }

        info!(meters, "pending drain complete");
        log_event(
            self.store.as_ref(),
            LOG_KIND,
            format!("Processed pending data for {meters} meter(s)"),
        )
        .await;
        Ok(meters)
    }
}
