use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ValidationError;

/// A reading as submitted by a meter: the cumulative kWh counter at a
/// point in time. This is the wire shape — the timestamp stays a string
/// so the queued payload round-trips byte-identically for fingerprinting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawReading {
    pub meter_id: String,
    pub timestamp: String,
    pub reading: f64,
}

/// A reading after the consumption delta has been derived, as stored in
/// the per-meter history sorted set. The atomic append script transforms
/// a [`RawReading`] into this shape; nothing else writes history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: String,
    pub reading_value: f64,
    pub consumption: f64,
}

impl RawReading {
    /// Validate all fields: 9-digit meter id, parseable timestamp, finite
    /// non-negative reading.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !is_valid_meter_id(&self.meter_id) {
            return Err(ValidationError::MeterId);
        }
        parse_utc_timestamp(&self.timestamp)?;
        if !self.reading.is_finite() || self.reading < 0.0 {
            return Err(ValidationError::Reading);
        }
        Ok(())
    }

    /// The reading's timestamp as UTC. Naive timestamps are interpreted
    /// as UTC — all scoring and bucketing downstream assumes this.
    pub fn timestamp_utc(&self) -> Result<DateTime<Utc>, ValidationError> {
        parse_utc_timestamp(&self.timestamp)
    }
}

impl HistoryRecord {
    pub fn timestamp_utc(&self) -> Result<DateTime<Utc>, ValidationError> {
        parse_utc_timestamp(&self.timestamp)
    }
}

/// Meter ids are exactly nine ASCII digits.
pub fn is_valid_meter_id(meter_id: &str) -> bool {
    meter_id.len() == 9 && meter_id.bytes().all(|b| b.is_ascii_digit())
}

/// Parse an ISO-8601 timestamp. Offsets are honored; naive timestamps
/// (no offset) are taken as UTC.
pub fn parse_utc_timestamp(s: &str) -> Result<DateTime<Utc>, ValidationError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(ValidationError::Timestamp(s.to_string()))
}

/// Stable identity of a queued payload: lowercase hex SHA-256 over the
/// exact payload string. Re-submitting the same bytes yields the same
/// fingerprint; any change (whitespace included) is a new delivery.
pub fn fingerprint(payload: &str) -> String {
    let digest = Sha256::digest(payload.as_bytes());
    hex::encode(digest)
}

/// Serialize the history record up to (but not including) the consumption
/// value, e.g. `{"timestamp":"…","reading_value":102.5,"consumption":`.
///
/// The atomic script appends the derived consumption and the closing brace
/// server-side, so the completed record is written in the same operation
/// that advances the last-reading key.
pub fn history_record_prefix(timestamp: &str, reading_value: f64) -> String {
    format!(
        "{{\"timestamp\":{},\"reading_value\":{},\"consumption\":",
        serde_json::json!(timestamp),
        reading_value
    )
}
