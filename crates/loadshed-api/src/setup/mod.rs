//! Application initialization

pub mod routes;
pub mod server;

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use loadshed_core::{LoadShedConfig, ProcStatSource, SharedUtilization};
use loadshed_infra::{HttpMetrics, LoadShedGate, SamplerHandle, UtilizationSampler};

use crate::state::AppState;

/// Open the counter source, start the sampler and build the router.
///
/// The returned `SamplerHandle` is owned by the caller, who shuts it down
/// after the server stops.
pub async fn initialize_app(
    config: LoadShedConfig,
) -> Result<(Arc<AppState>, Router, SamplerHandle)> {
    config.validate()?;

    let source = ProcStatSource::open(&config.cpu_stat_path)?;
    let utilization = SharedUtilization::new();
    let sampler =
        UtilizationSampler::start(source, utilization.clone(), config.refresh_interval).await?;

    tracing::info!(
        cpu_stat_path = %config.cpu_stat_path,
        utilization_limit = config.utilization_limit,
        refresh_interval_ms = config.refresh_interval.as_millis() as u64,
        "CPU load shedding enabled"
    );

    let gate = Arc::new(
        LoadShedGate::new(config.utilization_limit, utilization)
            .with_retry_after(config.refresh_interval),
    );
    let metrics = Arc::new(HttpMetrics::new(
        config.metrics_service.clone(),
        &config.metrics_prefix,
    )?);
    let state = Arc::new(AppState::new(config, gate, metrics));
    let router = routes::setup_routes(state.clone());

    Ok((state, router, sampler))
}
