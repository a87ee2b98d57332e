//! Wires the hub server and the demo producers together.

use std::sync::Arc;
use std::time::Duration;

use pulseboard_hub::{HubServer, MetricsJob, ServerConfig, TrainingConfig, TrainingSimulation};
use pulseboard_protocol::constants::WS_PATH;

use crate::config::Config;

/// Runs the server until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let server = HubServer::new(ServerConfig {
        bind: config.bind,
        port: config.port,
    });
    let server_run = Arc::clone(&server);
    let server_task = tokio::spawn(async move {
        if let Err(e) = server_run.run().await {
            tracing::error!("server error: {e}");
        }
    });

    // Wait for the server to bind; bail out if it failed.
    let port = loop {
        let p = server.port().await;
        if p > 0 {
            break p;
        }
        if server_task.is_finished() {
            anyhow::bail!("hub server failed to start");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    tracing::info!(port, path = WS_PATH, "hub ready");

    let producers = server.cancel_token().child_token();
    let metrics = MetricsJob::new(server.hub())
        .with_interval(Duration::from_secs(config.metrics_interval_secs.max(1)))
        .spawn(producers.clone());

    let training = config.simulate_training.then(|| {
        let training_config = TrainingConfig {
            epochs: config.training_epochs.max(1),
            ..TrainingConfig::default()
        };
        TrainingSimulation::new(server.hub(), training_config).spawn(producers.clone())
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("SIGINT received, shutting down");

    producers.cancel();
    metrics.await?;
    if let Some(training) = training {
        training.await?;
    }

    server.shutdown();
    server_task.await?;
    Ok(())
}
