//! Domain-focused API endpoint modules.
//!
//! Each sub-module owns a single responsibility area. Shared response
//! types and status-code helpers live here in mod.rs.

pub mod billing;
pub(crate) mod doc;
pub mod health;
pub mod logs_backup;
pub mod maintenance;
pub mod query;
pub mod readings;
pub mod register;

use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

// ── Shared types ─────────────────────────────────────────────────

/// The uniform error body: `{"status":"error","message":"…"}`.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub message: String,
}

pub(crate) type ApiError = (StatusCode, Json<ErrorResponse>);

fn error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            status: "error",
            message: message.into(),
        }),
    )
}

pub(crate) fn bad_request(message: impl Into<String>) -> ApiError {
    error(StatusCode::BAD_REQUEST, message)
}

pub(crate) fn conflict(message: impl Into<String>) -> ApiError {
    error(StatusCode::CONFLICT, message)
}

pub(crate) fn not_found(message: impl Into<String>) -> ApiError {
    error(StatusCode::NOT_FOUND, message)
}

/// 500 with a generic body. The cause is logged by the caller with
/// metadata only; internals never reach the client.
pub(crate) fn internal() -> ApiError {
    error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

// ── Re-exports ───────────────────────────────────────────────────
// Preserves flat `api::foo` import paths used by route registration.

pub use billing::monthly_billing;
pub use doc::ApiDoc;
pub use health::{health, queue_status};
pub use logs_backup::{get_backup, get_logs};
pub use maintenance::stop_server;
pub use query::user_query;
pub use readings::{submit_bulk, submit_reading};
pub use register::register;
