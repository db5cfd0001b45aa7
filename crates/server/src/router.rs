//! HTTP router construction.
//!
//! Assembles all routes, the maintenance middleware, CORS, and the
//! OpenAPI docs into a single `Router`.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tracing::warn;
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::api::{self, ApiDoc, ErrorResponse};
use crate::state::AppState;

/// Paths that stay reachable while the maintenance flag is set: the
/// maintenance control itself, backup and log reads, and both ingress
/// endpoints (meters keep reporting; their readings quarantine to
/// pending).
pub const MAINTENANCE_ALLOWLIST: &[&str] = &[
    "/stopserver",
    "/get_backup",
    "/get_logs",
    "/meter/reading",
    "/meter/bulk_readings",
];

/// Build the complete application router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = if state.config.server.cors_origin == "*" {
        CorsLayer::permissive()
    } else {
        match state.config.server.cors_origin.parse::<HeaderValue>() {
            Ok(origin) => CorsLayer::new().allow_origin(origin),
            Err(e) => {
                warn!(error = %e, "invalid CORS_ORIGIN, falling back to permissive");
                CorsLayer::permissive()
            }
        }
    };

    Router::new()
        .route("/health", get(api::health))
        .route("/queue/status", get(api::queue_status))
        .route("/register", post(api::register))
        .route("/meter/reading", post(api::submit_reading))
        .route("/meter/bulk_readings", post(api::submit_bulk))
        .route("/api/user/query", get(api::user_query))
        .route("/api/billing", get(api::monthly_billing))
        .route("/stopserver", get(api::stop_server))
        .route("/get_backup", get(api::get_backup))
        .route("/get_logs", get(api::get_logs))
        .with_state(state.clone())
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .layer(middleware::from_fn_with_state(state, maintenance_guard))
        .layer(cors)
}

/// Reject non-allowlisted requests with 503 while maintenance is active.
///
/// A flag read failure fails open: a degraded store must not take the
/// whole API down with it.
async fn maintenance_guard(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if !MAINTENANCE_ALLOWLIST.contains(&path) {
        match state.maintenance.is_active().await {
            Ok(true) => {
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(ErrorResponse {
                        status: "error",
                        message: "Server is in maintenance mode. Please try again later."
                            .to_string(),
                    }),
                )
                    .into_response();
            }
            Ok(false) => {}
            Err(e) => warn!(error = %e, "maintenance flag read failed; allowing request"),
        }
    }
    next.run(request).await
}
