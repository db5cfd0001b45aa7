//! HTTP surface for the meter telemetry backend.
//!
//! The binary wires config, store, and worker pool together in `main.rs`;
//! everything routable lives here so the contract tests can drive the
//! router directly.

pub mod api;
pub mod router;
pub mod state;

pub use router::build_router;
pub use state::AppState;
