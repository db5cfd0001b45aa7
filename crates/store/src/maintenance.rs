//! Maintenance flag wrapper.
//!
//! A single process-wide flag backed by the store with a TTL, so a crashed
//! maintenance driver can never leave the system quarantined forever.
//! Read by ingress on every submission and by the HTTP middleware;
//! written only by the maintenance driver.

use std::sync::Arc;
use std::time::Duration;

use crate::error::StoreError;
use crate::store::MeterStore;

#[derive(Clone)]
pub struct MaintenanceState {
    store: Arc<dyn MeterStore>,
}

impl MaintenanceState {
    pub fn new(store: Arc<dyn MeterStore>) -> Self {
        Self { store }
    }

    /// Enter maintenance. Returns `false` if maintenance is already active.
    pub async fn enter(&self, ttl: Duration) -> Result<bool, StoreError> {
        self.store.set_maintenance(ttl).await
    }

    /// Leave maintenance. Idempotent — the flag may already have expired.
    pub async fn exit(&self) -> Result<(), StoreError> {
        self.store.clear_maintenance().await
    }

    pub async fn is_active(&self) -> Result<bool, StoreError> {
        self.store.maintenance_active().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;

    #[tokio::test]
    async fn test_enter_exit_cycle() {
        let state = MaintenanceState::new(Arc::new(MemoryStore::new()));
        assert!(!state.is_active().await.unwrap());

        assert!(state.enter(Duration::from_secs(60)).await.unwrap());
        assert!(state.is_active().await.unwrap());

        // Re-entry while active is refused.
        assert!(!state.enter(Duration::from_secs(60)).await.unwrap());

        state.exit().await.unwrap();
        assert!(!state.is_active().await.unwrap());
    }
}
