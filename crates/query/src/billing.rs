//! Monthly billing over the daily backup hashes.
//!
//! Billing never reads raw history — the per-day sums written at rollup
//! time are the source of truth, so a bill is stable once the day's books
//! are closed.

use std::collections::BTreeMap;

use serde::Serialize;

use wattline_store::{keys, MeterStore};

use crate::error::QueryError;

#[derive(Debug, Serialize)]
pub struct BillingSummary {
    pub meter_id: String,
    pub month: String,
    pub total_usage: f64,
    /// Date -> usage for every day of the month with backup data.
    pub daily_usage: BTreeMap<String, f64>,
}

/// `YYYY-MM` with a plausible month number.
pub fn is_valid_month(month: &str) -> bool {
    let bytes = month.as_bytes();
    if bytes.len() != 7 || bytes[4] != b'-' {
        return false;
    }
    if !month[..4].bytes().all(|b| b.is_ascii_digit())
        || !month[5..].bytes().all(|b| b.is_ascii_digit())
    {
        return false;
    }
    matches!(month[5..].parse::<u8>(), Ok(1..=12))
}

/// Aggregate one meter's month from the daily backups. Fails with
/// [`QueryError::NoBillingData`] when no backup day in the month has an
/// entry for the meter.
pub async fn billing(
    store: &dyn MeterStore,
    meter_id: &str,
    month: &str,
) -> Result<BillingSummary, QueryError> {
    if !is_valid_month(month) {
        return Err(QueryError::InvalidMonth(month.to_string()));
    }

    let mut daily_usage = BTreeMap::new();
    for key in store.scan_keys(&keys::backup_month_pattern(month)).await? {
        let Some(date) = keys::date_from_backup_key(&key) else {
            continue;
        };
        let entries = store.backup_entries(date).await?;
        if let Some(usage) = entries.get(meter_id) {
            daily_usage.insert(date.to_string(), *usage);
        }
    }

    if daily_usage.is_empty() {
        return Err(QueryError::NoBillingData {
            meter_id: meter_id.to_string(),
            month: month.to_string(),
        });
    }

    let total_usage = daily_usage.values().sum();
    Ok(BillingSummary {
        meter_id: meter_id.to_string(),
        month: month.to_string(),
        total_usage,
        daily_usage,
    })
}
