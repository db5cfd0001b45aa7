//! Store keyspace.
//!
//! Every key the system touches is built or parsed here; nothing else
//! formats key strings. The layout is flat string keys so it maps onto
//! any Redis-shaped store.

/// Hash of registered meter ids.
pub const REGISTRY: &str = "all_users";

/// Shared work queue of raw reading payloads.
pub const WORK_QUEUE: &str = "meter:readings_queue";

/// Payloads awaiting re-apply after a transient failure.
pub const RETRY_QUEUE: &str = "meter:retry_queue";

/// Payloads that exhausted their retries.
pub const DEAD_LETTER: &str = "meter:dead_letter";

/// Sorted set payload -> apply attempt count.
pub const RETRY_COUNTS: &str = "meter:retry_counts";

/// Set of payload fingerprints already applied.
pub const PROCESSED_SET: &str = "processed_records";

/// Presence-with-TTL maintenance flag.
pub const MAINTENANCE_FLAG: &str = "maintenance_mode";

/// Scan pattern matching every meter's history set.
pub const HISTORY_PATTERN: &str = "meter:*:history";

/// Scan pattern matching every meter's pending list.
pub const PENDING_PATTERN: &str = "meter:*:pending";

pub fn history(meter_id: &str) -> String {
    format!("meter:{meter_id}:history")
}

pub fn last_reading(meter_id: &str) -> String {
    format!("meter:{meter_id}:last_reading")
}

pub fn pending(meter_id: &str) -> String {
    format!("meter:{meter_id}:pending")
}

pub fn meter_lock(meter_id: &str) -> String {
    format!("lock:meter:{meter_id}")
}

pub fn backup(date: &str) -> String {
    format!("backup:meter_data:{date}")
}

pub fn backup_month_pattern(month: &str) -> String {
    format!("backup:meter_data:{month}-*")
}

pub fn logs(kind: &str) -> String {
    format!("logs:{kind}")
}

/// Extract the meter id from a `meter:{id}:history` or `meter:{id}:pending`
/// key returned by a scan.
pub fn meter_id_from_key(key: &str) -> Option<&str> {
    let rest = key.strip_prefix("meter:")?;
    let (meter_id, _suffix) = rest.split_once(':')?;
    if meter_id.is_empty() {
        return None;
    }
    Some(meter_id)
}

/// Extract the date from a `backup:meter_data:{date}` key.
pub fn date_from_backup_key(key: &str) -> Option<&str> {
    key.strip_prefix("backup:meter_data:")
}
