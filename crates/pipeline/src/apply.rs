//! The single write path into a meter's history.
//!
//! Both the worker pool and the maintenance pending-drain go through
//! [`apply_reading`]: fingerprint dedupe, then the store-side atomic
//! delta derivation. Nothing else appends history records.

use tracing::warn;

use wattline_core::reading::{fingerprint, history_record_prefix};
use wattline_store::{MeterStore, StoreError};

use crate::parser::ParsedReading;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ApplyOutcome {
    /// The reading was appended with the derived consumption.
    Applied { consumption: f64 },
    /// This exact payload was applied before; nothing was written.
    Duplicate,
}

/// Apply one parsed reading to its meter's history.
///
/// The fingerprint is recorded before the append; if the append then
/// fails, the fingerprint is removed again so a retried delivery of the
/// same payload is not mistaken for a duplicate.
pub async fn apply_reading(
    store: &dyn MeterStore,
    item: &ParsedReading,
) -> Result<ApplyOutcome, StoreError> {
    let fp = fingerprint(&item.raw);
    if !store.mark_processed(&fp).await? {
        return Ok(ApplyOutcome::Duplicate);
    }

    let prefix = history_record_prefix(&item.reading.timestamp, item.reading.reading);
    match store
        .append_history_atomic(&item.reading.meter_id, item.reading.reading, item.score, &prefix)
        .await
    {
        Ok(consumption) => {
            if consumption < 0.0 {
                // An earlier timestamp landed after a later one was applied
                // (cross-batch reordering). Stored as-is.
                warn!(
                    meter_id = %item.reading.meter_id,
                    timestamp = %item.reading.timestamp,
                    consumption = consumption,
                    "negative consumption: out-of-order reading"
                );
            }
            Ok(ApplyOutcome::Applied { consumption })
        }
        Err(e) => {
            if let Err(unmark_err) = store.unmark_processed(&fp).await {
                warn!(
                    meter_id = %item.reading.meter_id,
                    error = %unmark_err,
                    "failed to roll back fingerprint after apply failure"
                );
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_payload;
    use wattline_store::MemoryStore;

    fn payload(ts: &str, value: f64) -> String {
        format!(r#"{{"meter_id":"100000001","timestamp":"{ts}","reading":{value}}}"#)
    }

    #[tokio::test]
    async fn test_first_reading_consumption_zero() {
        let store = MemoryStore::new();
        let item = parse_payload(&payload("2025-02-20T10:00:00", 100.0)).unwrap();
        let outcome = apply_reading(&store, &item).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied { consumption: 0.0 });
    }

    #[tokio::test]
    async fn test_second_reading_gets_delta() {
        let store = MemoryStore::new();
        let first = parse_payload(&payload("2025-02-20T10:00:00", 100.0)).unwrap();
        let second = parse_payload(&payload("2025-02-20T10:30:00", 102.5)).unwrap();
        apply_reading(&store, &first).await.unwrap();
        let outcome = apply_reading(&store, &second).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied { consumption: 2.5 });
    }

    #[tokio::test]
    async fn test_exact_duplicate_is_skipped() {
        let store = MemoryStore::new();
        let item = parse_payload(&payload("2025-02-20T10:00:00", 100.0)).unwrap();
        apply_reading(&store, &item).await.unwrap();
        let outcome = apply_reading(&store, &item).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Duplicate);

        let records = store
            .history_range("100000001", f64::NEG_INFINITY, f64::INFINITY)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
    }
}
