//! Operational log and backup read endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use wattline_store::LogEntry;

use crate::state::AppState;

use super::{internal, not_found, ApiError, ErrorResponse};

const DEFAULT_LOG_KIND: &str = "daily_jobs";
const DEFAULT_LOG_LIMIT: usize = 50;

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct LogsParams {
    /// Log stream kind, e.g. `daily_jobs` or `background_worker`.
    pub log_type: Option<String>,
    /// Maximum entries to return (default 50).
    pub limit: Option<usize>,
    /// Optional `YYYY-MM-DD` filter on entry timestamps.
    pub date: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct LogsResponse {
    pub log_type: String,
    pub count: usize,
    #[schema(value_type = Vec<Object>)]
    pub logs: Vec<LogEntry>,
}

/// Read operational logs
#[utoipa::path(
    get,
    path = "/get_logs",
    tag = "Operations",
    params(LogsParams),
    responses(
        (status = 200, description = "Recent log entries", body = LogsResponse),
        (status = 500, description = "Internal error", body = ErrorResponse)
    )
)]
pub async fn get_logs(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LogsParams>,
) -> Result<Json<LogsResponse>, ApiError> {
    let log_type = params.log_type.unwrap_or_else(|| DEFAULT_LOG_KIND.to_string());
    let limit = params.limit.unwrap_or(DEFAULT_LOG_LIMIT);

    let raw = state.store.recent_logs(&log_type, limit).await.map_err(|e| {
        error!(log_type = %log_type, error = %e, "log read failed");
        internal()
    })?;

    let mut logs: Vec<LogEntry> = raw
        .iter()
        .filter_map(|entry| match serde_json::from_str::<LogEntry>(entry) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(log_type = %log_type, error = %e, "skipping unparseable log entry");
                None
            }
        })
        .collect();

    if let Some(date) = &params.date {
        logs.retain(|entry| entry.matches_date(date));
    }

    Ok(Json(LogsResponse {
        count: logs.len(),
        log_type,
        logs,
    }))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct BackupParams {
    /// `YYYY-MM-DD`; defaults to yesterday (UTC).
    pub date: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct BackupResponse {
    pub status: &'static str,
    pub date: String,
    /// Meter id -> summed consumption for the date.
    pub data: HashMap<String, f64>,
}

/// Read one day's rollup backup
#[utoipa::path(
    get,
    path = "/get_backup",
    tag = "Operations",
    params(BackupParams),
    responses(
        (status = 200, description = "Backup hash for the date", body = BackupResponse),
        (status = 404, description = "No backup for the date", body = ErrorResponse),
        (status = 500, description = "Internal error", body = ErrorResponse)
    )
)]
pub async fn get_backup(
    State(state): State<Arc<AppState>>,
    Query(params): Query<BackupParams>,
) -> Result<Json<BackupResponse>, ApiError> {
    let date = params.date.unwrap_or_else(|| {
        (Utc::now() - Duration::days(1)).format("%Y-%m-%d").to_string()
    });

    let data = state.store.backup_entries(&date).await.map_err(|e| {
        error!(date = %date, error = %e, "backup read failed");
        internal()
    })?;
    if data.is_empty() {
        return Err(not_found(format!("No backup data found for {date}")));
    }

    Ok(Json(BackupResponse {
        status: "success",
        date,
        data,
    }))
}
