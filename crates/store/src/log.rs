//! Store-backed operational log stream.
//!
//! Components record notable events (maintenance stages, worker failures)
//! into `logs:{kind}` so operators can read them back through the HTTP
//! surface without shell access to the process. Entries are structured so
//! readers can filter on the timestamp prefix.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::MeterStore;

/// One entry in a log stream. The timestamp is RFC 3339 UTC; date filters
/// match on its first ten characters (`YYYY-MM-DD`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub message: String,
}

impl LogEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            message: message.into(),
        }
    }

    /// Whether this entry's timestamp falls on the given `YYYY-MM-DD` date.
    pub fn matches_date(&self, date: &str) -> bool {
        self.timestamp.len() >= 10 && &self.timestamp[..10] == date
    }
}

/// Record an event to the store-backed stream. A store failure here is
/// logged and swallowed — observability must not take down the pipeline.
pub async fn log_event(store: &dyn MeterStore, kind: &str, message: impl Into<String>) {
    let entry = LogEntry::new(message);
    let serialized = match serde_json::to_string(&entry) {
        Ok(s) => s,
        Err(e) => {
            warn!(kind = %kind, error = %e, "failed to serialize log entry");
            return;
        }
    };
    if let Err(e) = store.append_log(kind, &serialized).await {
        warn!(kind = %kind, error = %e, "failed to append log entry");
    }
}
