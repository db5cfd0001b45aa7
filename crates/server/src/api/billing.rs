//! Monthly billing endpoint.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use wattline_core::reading::is_valid_meter_id;
use wattline_query::billing::billing;
use wattline_query::QueryError;

use crate::state::AppState;

use super::{bad_request, internal, not_found, ApiError, ErrorResponse};

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct BillingParams {
    /// 9-digit meter id.
    pub meter_id: Option<String>,
    /// Billing month in `YYYY-MM` format.
    pub month: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct BillingResponse {
    pub status: &'static str,
    pub meter_id: String,
    pub month: String,
    pub total_usage: f64,
    pub daily_usage: BTreeMap<String, f64>,
}

/// Monthly bill from the daily backups
#[utoipa::path(
    get,
    path = "/api/billing",
    tag = "Queries",
    params(BillingParams),
    responses(
        (status = 200, description = "Billing summary", body = BillingResponse),
        (status = 400, description = "Missing/invalid parameters", body = ErrorResponse),
        (status = 404, description = "No billing data for the month", body = ErrorResponse),
        (status = 500, description = "Internal error", body = ErrorResponse)
    )
)]
pub async fn monthly_billing(
    State(state): State<Arc<AppState>>,
    Query(params): Query<BillingParams>,
) -> Result<Json<BillingResponse>, ApiError> {
    let meter_id = params
        .meter_id
        .ok_or_else(|| bad_request("Invalid or missing meter_id"))?;
    if !is_valid_meter_id(&meter_id) {
        return Err(bad_request("Invalid or missing meter_id"));
    }
    let month = params
        .month
        .ok_or_else(|| bad_request("Invalid or missing month. Expected format: YYYY-MM"))?;

    let summary = billing(state.store.as_ref(), &meter_id, &month)
        .await
        .map_err(|e| match e {
            QueryError::InvalidMonth(_) => {
                bad_request("Invalid or missing month. Expected format: YYYY-MM")
            }
            QueryError::NoBillingData { .. } => not_found(e.to_string()),
            other => {
                error!(meter_id = %meter_id, month = %month, error = %other, "billing query failed");
                internal()
            }
        })?;

    Ok(Json(BillingResponse {
        status: "success",
        meter_id: summary.meter_id,
        month: summary.month,
        total_usage: summary.total_usage,
        daily_usage: summary.daily_usage,
    }))
}
