use std::sync::Arc;

use wattline_core::Config;
use wattline_pipeline::{MaintenanceDriver, PipelineMetrics};
use wattline_store::{MaintenanceState, MeterStore};

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn MeterStore>,
    /// Maintenance flag view shared by ingress and the middleware.
    pub maintenance: MaintenanceState,
    /// Pipeline counters, read-only from the status endpoint.
    pub metrics: Arc<PipelineMetrics>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn MeterStore>, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            maintenance: MaintenanceState::new(store.clone()),
            config,
            store,
            metrics,
        }
    }

    /// Driver for the daily maintenance sequence, spawned by `/stopserver`.
    pub fn maintenance_driver(&self) -> MaintenanceDriver {
        MaintenanceDriver::new(self.store.clone(), self.config.maintenance.clone())
    }
}
