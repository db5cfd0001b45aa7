//! Parse queued payloads into typed readings.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::warn;

use wattline_core::reading::RawReading;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("{0}")]
    Invalid(#[from] wattline_core::ValidationError),
}

/// A payload popped from a queue, parsed and scored. The exact queued
/// string is kept alongside the typed reading: the fingerprint and the
/// retry channel both key on the original bytes.
#[derive(Debug, Clone)]
pub struct ParsedReading {
    pub raw: String,
    pub reading: RawReading,
    pub timestamp: DateTime<Utc>,
    /// History score: unix seconds of the reading's timestamp.
    pub score: f64,
}

/// Parse a single queued payload.
pub fn parse_payload(raw: &str) -> Result<ParsedReading, ParseError> {
    let reading: RawReading =
        serde_json::from_str(raw).map_err(|e| ParseError::Json(e.to_string()))?;
    let timestamp = reading.timestamp_utc()?;
    Ok(ParsedReading {
        raw: raw.to_string(),
        reading,
        timestamp,
        score: timestamp.timestamp() as f64,
    })
}

/// Parse a batch, separating successes from failures so one bad payload
/// never blocks the rest. Failures are logged here; the caller decides
/// whether to drop or quarantine them.
pub fn parse_batch(raws: Vec<String>) -> (Vec<ParsedReading>, Vec<(String, ParseError)>) {
    let mut parsed = Vec::with_capacity(raws.len());
    let mut errors = Vec::new();
    for raw in raws {
        match parse_payload(&raw) {
            Ok(item) => parsed.push(item),
            Err(e) => {
                warn!(error = %e, "failed to parse queued payload");
                errors.push((raw, e));
            }
        }
    }
    (parsed, errors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_payload() {
        let raw = r#"{"meter_id":"100000001","timestamp":"2025-02-20T10:00:00","reading":100.0}"#;
        let parsed = parse_payload(raw).unwrap();
        assert_eq!(parsed.reading.meter_id, "100000001");
        assert_eq!(parsed.reading.reading, 100.0);
        assert_eq!(parsed.timestamp.to_rfc3339(), "2025-02-20T10:00:00+00:00");
        assert_eq!(parsed.score, parsed.timestamp.timestamp() as f64);
        assert_eq!(parsed.raw, raw);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(parse_payload("not json"), Err(ParseError::Json(_))));
        assert!(matches!(
            parse_payload(r#"{"meter_id":"100000001"}"#),
            Err(ParseError::Json(_))
        ));
        assert!(matches!(
            parse_payload(r#"{"meter_id":"100000001","timestamp":"eh","reading":1.0}"#),
            Err(ParseError::Invalid(_))
        ));
    }

    #[test]
    fn test_parse_batch_separates_failures() {
        let raws = vec![
            r#"{"meter_id":"100000001","timestamp":"2025-02-20T10:00:00","reading":100.0}"#
                .to_string(),
            "garbage".to_string(),
            r#"{"meter_id":"100000002","timestamp":"2025-02-20T10:30:00","reading":50.0}"#
                .to_string(),
        ];
        let (parsed, errors) = parse_batch(raws);
        assert_eq!(parsed.len(), 2);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "garbage");
    }
}
