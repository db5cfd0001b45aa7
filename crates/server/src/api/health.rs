//! Health and pipeline status endpoints.
//!
//! SRP: server readiness and operational metrics.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use tracing::error;

use wattline_pipeline::MetricsSnapshot;
use wattline_store::QueueDepths;

use crate::state::AppState;

use super::{internal, ApiError, ErrorResponse};

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub store_backend: String,
    pub maintenance_active: bool,
}

/// Server health
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses(
        (status = 200, description = "Server health", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let maintenance_active = state.maintenance.is_active().await.unwrap_or(false);
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        store_backend: state.config.store.backend.clone(),
        maintenance_active,
    })
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct QueueStatusResponse {
    #[schema(value_type = Object)]
    pub queues: QueueDepths,
    #[schema(value_type = Object)]
    pub pipeline: MetricsSnapshot,
}

/// Queue depths and pipeline counters
#[utoipa::path(
    get,
    path = "/queue/status",
    tag = "Health",
    responses(
        (status = 200, description = "Queue depths and pipeline counters", body = QueueStatusResponse),
        (status = 500, description = "Internal error", body = ErrorResponse)
    )
)]
pub async fn queue_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<QueueStatusResponse>, ApiError> {
    let queues = state.store.queue_depths().await.map_err(|e| {
        error!(error = %e, "queue depth read failed");
        internal()
    })?;
    Ok(Json(QueueStatusResponse {
        queues,
        pipeline: state.metrics.snapshot(),
    }))
}
