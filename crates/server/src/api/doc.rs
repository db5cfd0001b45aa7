//! OpenAPI documentation aggregator.
//!
//! Collects all `#[utoipa::path]`-annotated handlers and `ToSchema`-derived
//! types into a single OpenAPI spec, served via Scalar UI at `/docs`.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "wattline API",
        version = "0.1.0",
        description = "Smart-meter telemetry backend: queued ingestion, per-meter consumption history, fixed-window queries, and monthly billing.",
    ),
    tags(
        (name = "Health", description = "Server health and pipeline status"),
        (name = "Registration", description = "Meter registry"),
        (name = "Readings", description = "Single and bulk reading ingestion"),
        (name = "Queries", description = "Fixed-window consumption queries and monthly billing"),
        (name = "Maintenance", description = "Daily maintenance control"),
        (name = "Operations", description = "Operational logs and rollup backups"),
    ),
    paths(
        crate::api::health::health,
        crate::api::health::queue_status,
        crate::api::register::register,
        crate::api::readings::submit_reading,
        crate::api::readings::submit_bulk,
        crate::api::query::user_query,
        crate::api::billing::monthly_billing,
        crate::api::maintenance::stop_server,
        crate::api::logs_backup::get_logs,
        crate::api::logs_backup::get_backup,
    ),
    components(schemas(
        crate::api::ErrorResponse,
        crate::api::health::HealthResponse,
        crate::api::health::QueueStatusResponse,
        crate::api::register::RegisterRequest,
        crate::api::register::RegisterResponse,
        crate::api::readings::SubmitResponse,
        crate::api::readings::BulkResponse,
        crate::api::query::ThirtyMinuteResponse,
        crate::api::query::DayResponse,
        crate::api::query::DailyBucketsResponse,
        crate::api::query::MonthlyBucketsResponse,
        crate::api::billing::BillingResponse,
        crate::api::maintenance::MaintenanceResponse,
        crate::api::logs_backup::LogsResponse,
        crate::api::logs_backup::BackupResponse,
    ))
)]
pub struct ApiDoc;
