//! Consumption window queries.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::error;

use wattline_core::reading::is_valid_meter_id;
use wattline_query::{DailyBucket, DetailEntry, MonthlyBucket, Period, QueryAggregator};

use crate::state::AppState;

use super::{bad_request, internal, ApiError, ErrorResponse};

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct UserQueryParams {
    /// 9-digit meter id.
    pub meter_id: Option<String>,
    /// One of 30m / 1d / 1w / 1m / 1y.
    pub period: Option<String>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct TimeEntry {
    pub time: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ThirtyMinuteResponse {
    pub status: &'static str,
    pub meter_id: String,
    pub latest_increment: Option<f64>,
    pub data: Vec<TimeEntry>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct Aggregation {
    pub consumption: f64,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct DayData {
    pub aggregation: Aggregation,
    #[schema(value_type = Vec<Object>)]
    pub detail: Vec<DetailEntry>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct DayResponse {
    pub status: &'static str,
    pub meter_id: String,
    pub total_usage: f64,
    pub data: DayData,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct DailyBucketsResponse {
    pub status: &'static str,
    pub meter_id: String,
    pub total_usage: f64,
    #[schema(value_type = Vec<Object>)]
    pub data: Vec<DailyBucket>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct MonthlyBucketsResponse {
    pub status: &'static str,
    pub meter_id: String,
    pub total_usage: f64,
    #[schema(value_type = Vec<Object>)]
    pub data: Vec<MonthlyBucket>,
}

/// Query consumption over a fixed window
///
/// `30m` returns the most recent increment; `1d` a per-record detail
/// list; `1w`/`1m` day buckets; `1y` month buckets. All boundaries and
/// buckets are UTC.
#[utoipa::path(
    get,
    path = "/api/user/query",
    tag = "Queries",
    params(UserQueryParams),
    responses(
        (status = 200, description = "Window summary (shape depends on period)"),
        (status = 400, description = "Missing/invalid parameters or unregistered meter", body = ErrorResponse),
        (status = 500, description = "Internal error", body = ErrorResponse)
    )
)]
pub async fn user_query(
    State(state): State<Arc<AppState>>,
    Query(params): Query<UserQueryParams>,
) -> Result<Response, ApiError> {
    let meter_id = params
        .meter_id
        .ok_or_else(|| bad_request("Missing meter_id"))?;
    if !is_valid_meter_id(&meter_id) {
        return Err(bad_request("Invalid meter_id: expected a 9-digit string"));
    }

    let registered = state.store.is_registered(&meter_id).await.map_err(|e| {
        error!(meter_id = %meter_id, error = %e, "registry lookup failed");
        internal()
    })?;
    if !registered {
        return Err(bad_request("MeterID not registered"));
    }

    let period: Period = params
        .period
        .as_deref()
        .unwrap_or("")
        .parse()
        .map_err(|e: wattline_query::QueryError| bad_request(e.to_string()))?;

    let aggregator = QueryAggregator::new(state.store.clone());
    let now = Utc::now();

    let on_store_error = |e: wattline_query::QueryError| {
        error!(meter_id = %meter_id, error = %e, "window query failed");
        internal()
    };

    let response = match period {
        Period::ThirtyMinutes => {
            let latest = aggregator
                .latest_increment(&meter_id)
                .await
                .map_err(on_store_error)?;
            let (latest_increment, data) = match latest {
                Some(record) => (
                    Some(record.consumption),
                    vec![TimeEntry { time: record.timestamp }],
                ),
                None => (None, Vec::new()),
            };
            Json(ThirtyMinuteResponse {
                status: "success",
                meter_id,
                latest_increment,
                data,
            })
            .into_response()
        }
        Period::OneDay => {
            let window = aggregator
                .day_window(&meter_id, now)
                .await
                .map_err(on_store_error)?;
            Json(DayResponse {
                status: "success",
                meter_id,
                total_usage: window.total_usage,
                data: DayData {
                    aggregation: Aggregation {
                        consumption: window.total_usage,
                        start_time: window.start_time,
                        end_time: window.end_time,
                    },
                    detail: window.detail,
                },
            })
            .into_response()
        }
        Period::OneWeek | Period::OneMonth => {
            let days = if period == Period::OneWeek { 7 } else { 30 };
            let (total_usage, data) = aggregator
                .daily_buckets(&meter_id, days, now)
                .await
                .map_err(on_store_error)?;
            Json(DailyBucketsResponse {
                status: "success",
                meter_id,
                total_usage,
                data,
            })
            .into_response()
        }
        Period::OneYear => {
            let (total_usage, data) = aggregator
                .monthly_buckets(&meter_id, now)
                .await
                .map_err(on_store_error)?;
            Json(MonthlyBucketsResponse {
                status: "success",
                meter_id,
                total_usage,
                data,
            })
            .into_response()
        }
    };
    Ok(response)
}
