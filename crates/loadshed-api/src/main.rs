use loadshed_core::LoadShedConfig;
use loadshed_infra::init_telemetry;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Load configuration
    let config = LoadShedConfig::from_env()?;

    init_telemetry(config.log_format)
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    // Baseline read happens here; an unreadable counter source stops startup
    let (_state, router, sampler) = loadshed_api::setup::initialize_app(config.clone()).await?;

    loadshed_api::setup::server::start_server(&config, router).await?;

    let stats = sampler.shutdown().await?;
    tracing::info!(
        ticks = stats.ticks,
        published = stats.published,
        degraded = stats.degraded,
        "Sampler shut down"
    );

    Ok(())
}
