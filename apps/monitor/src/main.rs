//! Pulseboard monitor entry point.

mod app;
mod config;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting Pulseboard monitor"
    );

    let path = config::path_from_args(std::env::args());
    let config = config::Config::load(&path)?;
    tracing::info!(url = %config.url, fallback = config.fallback_enabled, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("monitor shut down cleanly");
    Ok(())
}
