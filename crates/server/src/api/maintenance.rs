//! Maintenance control endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tracing::error;

use crate::state::AppState;

use super::{bad_request, internal, ApiError, ErrorResponse};

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct MaintenanceResponse {
    pub status: &'static str,
    pub message: &'static str,
}

/// Enter maintenance mode
///
/// Sets the maintenance flag (TTL-bounded) and spawns the daily sequence
/// in the background: rollup, retention trim, window wait, pending drain.
/// Returns immediately.
#[utoipa::path(
    get,
    path = "/stopserver",
    tag = "Maintenance",
    responses(
        (status = 200, description = "Maintenance started", body = MaintenanceResponse),
        (status = 400, description = "Already in maintenance", body = ErrorResponse),
        (status = 500, description = "Internal error", body = ErrorResponse)
    )
)]
pub async fn stop_server(
    State(state): State<Arc<AppState>>,
) -> Result<Json<MaintenanceResponse>, ApiError> {
    let started = state.maintenance_driver().trigger().await.map_err(|e| {
        error!(error = %e, "failed to enter maintenance");
        internal()
    })?;
    if !started {
        return Err(bad_request("Already in maintenance"));
    }
    Ok(Json(MaintenanceResponse {
        status: "success",
        message: "Server in maintenance mode. Background job started.",
    }))
}
