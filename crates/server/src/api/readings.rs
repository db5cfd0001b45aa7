//! Ingress endpoints: single and bulk reading submission.
//!
//! Ingress never writes history — it validates, picks the destination
//! once from the maintenance flag (work queue, or the meter's pending
//! list while maintenance is active), and enqueues the serialized
//! payload. The worker pool does the rest.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tracing::{error, info};

use wattline_core::reading::RawReading;

use crate::state::AppState;

use super::{bad_request, conflict, internal, ApiError, ErrorResponse};

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SubmitResponse {
    pub status: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct BulkResponse {
    pub status: &'static str,
    pub message: String,
    pub success: usize,
    pub failed: usize,
}

/// Submit a single meter reading
///
/// Validates the reading, requires the meter to be registered, and queues
/// the payload. During maintenance the payload is quarantined in the
/// meter's pending list instead.
#[utoipa::path(
    post,
    path = "/meter/reading",
    tag = "Readings",
    responses(
        (status = 200, description = "Reading queued", body = SubmitResponse),
        (status = 400, description = "Validation failure", body = ErrorResponse),
        (status = 409, description = "Meter not registered", body = ErrorResponse),
        (status = 500, description = "Internal error", body = ErrorResponse)
    )
)]
pub async fn submit_reading(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let reading: RawReading = serde_json::from_value(body)
        .map_err(|e| bad_request(format!("Invalid reading payload: {e}")))?;
    reading.validate().map_err(|e| bad_request(e.to_string()))?;

    let registered = state
        .store
        .is_registered(&reading.meter_id)
        .await
        .map_err(|e| {
            error!(meter_id = %reading.meter_id, error = %e, "registry lookup failed");
            internal()
        })?;
    if !registered {
        return Err(conflict("MeterID not registered"));
    }

    let payload = serde_json::to_string(&reading).map_err(|e| {
        error!(meter_id = %reading.meter_id, error = %e, "failed to serialize reading");
        internal()
    })?;

    let in_maintenance = state.maintenance.is_active().await.map_err(|e| {
        error!(error = %e, "maintenance flag read failed");
        internal()
    })?;

    let (destination, message) = if in_maintenance {
        state
            .store
            .enqueue_pending(&reading.meter_id, std::slice::from_ref(&payload))
            .await
            .map_err(|e| {
                error!(
                    meter_id = %reading.meter_id,
                    timestamp = %reading.timestamp,
                    error = %e,
                    "pending enqueue failed"
                );
                internal()
            })?;
        ("pending", "stored to pending")
    } else {
        state
            .store
            .enqueue_readings(std::slice::from_ref(&payload))
            .await
            .map_err(|e| {
                error!(
                    meter_id = %reading.meter_id,
                    timestamp = %reading.timestamp,
                    error = %e,
                    "work queue enqueue failed"
                );
                internal()
            })?;
        ("queue", "queued")
    };

    info!(meter_id = %reading.meter_id, destination, "reading accepted");
    Ok(Json(SubmitResponse {
        status: "success",
        message: message.to_string(),
    }))
}

/// Submit a batch of meter readings
///
/// Invalid items are counted and skipped; valid items are appended in one
/// pipelined batch. The destination (work queue vs pending) is decided
/// once per call from the maintenance flag.
#[utoipa::path(
    post,
    path = "/meter/bulk_readings",
    tag = "Readings",
    responses(
        (status = 200, description = "Batch queued", body = BulkResponse),
        (status = 400, description = "Not an array or over the size cap", body = ErrorResponse),
        (status = 500, description = "Internal error", body = ErrorResponse)
    )
)]
pub async fn submit_bulk(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<BulkResponse>, ApiError> {
    let Some(items) = body.as_array() else {
        return Err(bad_request("Expected a JSON array of readings"));
    };
    let cap = state.config.pipeline.bulk_max_items;
    if items.len() > cap {
        return Err(bad_request(format!("Too many items: max {cap} per bulk request")));
    }

    let mut valid: Vec<(String, String)> = Vec::with_capacity(items.len());
    let mut failed = 0usize;
    for item in items {
        let Ok(reading) = serde_json::from_value::<RawReading>(item.clone()) else {
            failed += 1;
            continue;
        };
        if reading.validate().is_err() {
            failed += 1;
            continue;
        }
        match state.store.is_registered(&reading.meter_id).await {
            Ok(true) => {}
            Ok(false) => {
                failed += 1;
                continue;
            }
            Err(e) => {
                error!(meter_id = %reading.meter_id, error = %e, "registry lookup failed");
                failed += 1;
                continue;
            }
        }
        match serde_json::to_string(&reading) {
            Ok(payload) => valid.push((reading.meter_id, payload)),
            Err(_) => failed += 1,
        }
    }

    // One flag read decides the destination for the whole call.
    let in_maintenance = state.maintenance.is_active().await.map_err(|e| {
        error!(error = %e, "maintenance flag read failed");
        internal()
    })?;

    let success = valid.len();
    if in_maintenance {
        let mut by_meter: HashMap<String, Vec<String>> = HashMap::new();
        for (meter_id, payload) in valid {
            by_meter.entry(meter_id).or_default().push(payload);
        }
        for (meter_id, payloads) in by_meter {
            state
                .store
                .enqueue_pending(&meter_id, &payloads)
                .await
                .map_err(|e| {
                    error!(meter_id = %meter_id, error = %e, "pending enqueue failed");
                    internal()
                })?;
        }
    } else {
        let payloads: Vec<String> = valid.into_iter().map(|(_, payload)| payload).collect();
        state.store.enqueue_readings(&payloads).await.map_err(|e| {
            error!(error = %e, "bulk enqueue failed");
            internal()
        })?;
    }

    info!(success, failed, in_maintenance, "bulk submission accepted");
    Ok(Json(BulkResponse {
        status: "success",
        message: format!("Bulk queued. success={success}, failed={failed}"),
        success,
        failed,
    }))
}
