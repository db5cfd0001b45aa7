//! Meter registration.
//!
//! The full registration flow (region/area/dwelling lookup) belongs to an
//! external collaborator; the core contract is the registry hash that
//! ingress and queries consult.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use wattline_core::reading::is_valid_meter_id;

use crate::state::AppState;

use super::{bad_request, conflict, internal, ApiError, ErrorResponse};

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct RegisterRequest {
    pub meter_id: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct RegisterResponse {
    pub status: &'static str,
    pub meter_id: String,
}

/// Register a meter
#[utoipa::path(
    post,
    path = "/register",
    tag = "Registration",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Meter registered", body = RegisterResponse),
        (status = 400, description = "Invalid meter id", body = ErrorResponse),
        (status = 409, description = "Already registered", body = ErrorResponse)
    )
)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    if !is_valid_meter_id(&request.meter_id) {
        return Err(bad_request("Invalid meter_id: expected a 9-digit string"));
    }

    let newly_added = state
        .store
        .register_meter(&request.meter_id)
        .await
        .map_err(|e| {
            error!(meter_id = %request.meter_id, error = %e, "registration failed");
            internal()
        })?;
    if !newly_added {
        return Err(conflict("MeterID already registered"));
    }

    info!(meter_id = %request.meter_id, "meter registered");
    Ok(Json(RegisterResponse {
        status: "success",
        meter_id: request.meter_id,
    }))
}
