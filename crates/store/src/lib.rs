pub mod error;
pub mod keys;
pub mod log;
pub mod maintenance;
pub mod memory;
pub mod redis;
pub mod store;

use std::sync::Arc;

pub use error::StoreError;
pub use log::LogEntry;
pub use maintenance::MaintenanceState;
pub use memory::MemoryStore;
pub use self::redis::RedisStore;
pub use store::{MeterLock, MeterStore, QueueDepths};

use wattline_core::config::StoreConfig;

/// Build the configured store backend.
///
/// `redis` is the production backend; `memory` keeps identical semantics
/// in-process for development and tests.
pub async fn build_store(config: &StoreConfig) -> Result<Arc<dyn MeterStore>, StoreError> {
    match config.backend.as_str() {
        "redis" => Ok(Arc::new(RedisStore::connect(&config.redis_url()).await?)),
        "memory" => Ok(Arc::new(MemoryStore::new())),
        other => Err(StoreError::Backend(format!(
            "unknown store backend '{other}' — supported: redis, memory"
        ))),
    }
}
