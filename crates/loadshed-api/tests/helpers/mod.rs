//! Test helpers: build AppState and router for integration tests.
//!
//! Run from workspace root: `cargo test -p loadshed-api`.

use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use loadshed_api::setup::routes;
use loadshed_api::state::AppState;
use loadshed_core::{LoadShedConfig, SharedUtilization};
use loadshed_infra::{HttpMetrics, LoadShedGate};

pub const REFRESH_INTERVAL: Duration = Duration::from_millis(20);

/// Test application: server plus the utilization word its gate reads.
pub struct TestApp {
    pub server: TestServer,
    pub utilization: SharedUtilization,
    pub state: Arc<AppState>,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }
}

pub fn test_config(limit: u32) -> LoadShedConfig {
    LoadShedConfig {
        utilization_limit: limit,
        refresh_interval: REFRESH_INTERVAL,
        ..LoadShedConfig::default()
    }
}

/// App whose utilization is driven by the test instead of a sampler.
pub fn setup_test_app(config: LoadShedConfig) -> TestApp {
    let utilization = SharedUtilization::new();
    setup_test_app_with(config, utilization)
}

pub fn setup_test_app_with(config: LoadShedConfig, utilization: SharedUtilization) -> TestApp {
    let gate = Arc::new(
        LoadShedGate::new(config.utilization_limit, utilization.clone())
            .with_retry_after(config.refresh_interval),
    );
    let metrics = Arc::new(
        HttpMetrics::new(config.metrics_service.clone(), &config.metrics_prefix)
            .expect("Failed to register HTTP metrics"),
    );
    let state = Arc::new(AppState::new(config, gate, metrics));
    let router = routes::setup_routes(state.clone());
    let server = TestServer::new(router).expect("Failed to create test server");

    TestApp {
        server,
        utilization,
        state,
    }
}
