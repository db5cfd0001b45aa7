pub mod apply;
pub mod maintenance;
pub mod metrics;
pub mod parser;
pub mod worker;

pub use apply::{apply_reading, ApplyOutcome};
pub use maintenance::MaintenanceDriver;
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use parser::{parse_batch, parse_payload, ParseError, ParsedReading};
pub use worker::WorkerPool;
