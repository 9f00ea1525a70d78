use std::sync::Arc;

use loadshed_core::LoadShedConfig;
use loadshed_infra::{HttpMetrics, LoadShedGate};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: LoadShedConfig,
    pub gate: Arc<LoadShedGate>,
    pub metrics: Arc<HttpMetrics>,
}

impl AppState {
    pub fn new(
        config: LoadShedConfig,
        gate: Arc<LoadShedGate>,
        metrics: Arc<HttpMetrics>,
    ) -> Self {
        Self {
            config,
            gate,
            metrics,
        }
    }
}
