//! Fixed-window consumption queries over stored history.
//!
//! Windows are measured back from the caller-supplied `now`; bucketing is
//! by UTC calendar day or month. History records that fail to parse are
//! logged and skipped — a corrupt record never aborts a query.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use wattline_core::reading::HistoryRecord;
use wattline_store::MeterStore;

use crate::error::QueryError;

const DAY_SECS: f64 = 86_400.0;

/// The closed set of query windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    ThirtyMinutes,
    OneDay,
    OneWeek,
    OneMonth,
    OneYear,
}

impl FromStr for Period {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "30m" => Ok(Period::ThirtyMinutes),
            "1d" => Ok(Period::OneDay),
            "1w" => Ok(Period::OneWeek),
            "1m" => Ok(Period::OneMonth),
            "1y" => Ok(Period::OneYear),
            other => Err(QueryError::InvalidPeriod(other.to_string())),
        }
    }
}

/// One history record in a day-window detail list.
#[derive(Debug, Clone, Serialize)]
pub struct DetailEntry {
    pub time: String,
    pub consumption: f64,
}

/// Full-detail result for the one-day window.
#[derive(Debug, Serialize)]
pub struct DayWindow {
    pub total_usage: f64,
    pub start_time: String,
    pub end_time: String,
    pub detail: Vec<DetailEntry>,
}

/// Consumption summed over one UTC calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyBucket {
    pub date: String,
    pub consumption: f64,
}

/// Consumption summed over one UTC calendar month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlyBucket {
    pub month: String,
    pub consumption: f64,
}

/// Sum records into per-day buckets, ascending by date.
pub fn bucket_by_day(records: &[HistoryRecord]) -> Vec<DailyBucket> {
    let mut days: BTreeMap<String, f64> = BTreeMap::new();
    for record in records {
        match record.timestamp_utc() {
            Ok(ts) => {
                *days.entry(ts.format("%Y-%m-%d").to_string()).or_default() += record.consumption;
            }
            Err(e) => warn!(error = %e, "skipping record with unparseable timestamp"),
        }
    }
    days.into_iter()
        .map(|(date, consumption)| DailyBucket { date, consumption })
        .collect()
}

/// Sum records into per-month buckets, ascending by month.
pub fn bucket_by_month(records: &[HistoryRecord]) -> Vec<MonthlyBucket> {
    let mut months: BTreeMap<String, f64> = BTreeMap::new();
    for record in records {
        match record.timestamp_utc() {
            Ok(ts) => {
                *months.entry(ts.format("%Y-%m").to_string()).or_default() += record.consumption;
            }
            Err(e) => warn!(error = %e, "skipping record with unparseable timestamp"),
        }
    }
    months
        .into_iter()
        .map(|(month, consumption)| MonthlyBucket { month, consumption })
        .collect()
}

/// Read-side aggregator over a meter's history.
pub struct QueryAggregator {
    store: Arc<dyn MeterStore>,
}

impl QueryAggregator {
    pub fn new(store: Arc<dyn MeterStore>) -> Self {
        Self { store }
    }

    async fn records_since(
        &self,
        meter_id: &str,
        days_back: f64,
        now: DateTime<Utc>,
    ) -> Result<Vec<HistoryRecord>, QueryError> {
        let end = now.timestamp() as f64;
        let start = end - days_back * DAY_SECS;
        let raw = self.store.history_range(meter_id, start, end).await?;
        Ok(parse_records(meter_id, raw))
    }

    /// The most recent record, whose consumption is the latest increment.
    /// `None` when the meter has no history yet.
    pub async fn latest_increment(
        &self,
        meter_id: &str,
    ) -> Result<Option<HistoryRecord>, QueryError> {
        let Some(raw) = self.store.history_latest(meter_id).await? else {
            return Ok(None);
        };
        Ok(parse_records(meter_id, vec![raw]).pop())
    }

    /// Per-record detail over the last 24 hours plus the consumption total.
    pub async fn day_window(
        &self,
        meter_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DayWindow, QueryError> {
        let records = self.records_since(meter_id, 1.0, now).await?;
        let detail: Vec<DetailEntry> = records
            .iter()
            .map(|record| DetailEntry {
                time: record.timestamp.clone(),
                consumption: record.consumption,
            })
            .collect();
        let total_usage = records.iter().map(|r| r.consumption).sum();
        let start = now - chrono::Duration::days(1);
        Ok(DayWindow {
            total_usage,
            start_time: start.to_rfc3339(),
            end_time: now.to_rfc3339(),
            detail,
        })
    }

    /// Day buckets over the last `days` days (the 1w and 1m windows).
    pub async fn daily_buckets(
        &self,
        meter_id: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<(f64, Vec<DailyBucket>), QueryError> {
        let records = self.records_since(meter_id, days as f64, now).await?;
        let buckets = bucket_by_day(&records);
        let total = buckets.iter().map(|b| b.consumption).sum();
        Ok((total, buckets))
    }

    /// Month buckets over the last 365 days (the 1y window).
    pub async fn monthly_buckets(
        &self,
        meter_id: &str,
        now: DateTime<Utc>,
    ) -> Result<(f64, Vec<MonthlyBucket>), QueryError> {
        let records = self.records_since(meter_id, 365.0, now).await?;
        let buckets = bucket_by_month(&records);
        let total = buckets.iter().map(|b| b.consumption).sum();
        Ok((total, buckets))
    }
}

fn parse_records(meter_id: &str, raw: Vec<String>) -> Vec<HistoryRecord> {
    raw.iter()
        .filter_map(|record| match serde_json::from_str::<HistoryRecord>(record) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(meter_id = %meter_id, error = %e, "skipping unparseable history record");
                None
            }
        })
        .collect()
}
