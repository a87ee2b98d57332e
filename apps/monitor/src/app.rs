//! Follows the hub and periodically logs the dashboard.

use std::future::Future;
use std::time::Duration;

use pulseboard_subscriber::{
    DashboardState, FallbackGenerator, FallbackTicker, SharedDashboard, Subscriber,
};

use crate::config::Config;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let subscriber = Subscriber::connect(&config.url)?;

    let mut initial = DashboardState::new();
    initial.seed_history(&mut rand::thread_rng());
    let dashboard = SharedDashboard::new(initial);
    let subscriptions = dashboard.bind(&subscriber);

    let ticker = config.fallback_enabled.then(|| {
        FallbackTicker::spawn(
            subscriber.connected_watch(),
            FallbackGenerator::default(),
            dashboard.clone(),
        )
    });

    let report_every = Duration::from_secs(config.report_interval_secs.max(1));
    follow(&subscriber, &dashboard, &config.url, report_every, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for SIGINT: {e}");
            return;
        }
        tracing::info!("SIGINT received, shutting down");
    })
    .await;

    for sub in subscriptions {
        sub.unsubscribe();
    }
    if let Some(ticker) = ticker {
        ticker.shutdown().await;
    }
    subscriber.shutdown().await;
    Ok(())
}

/// Logs connection changes and dashboard summaries until `shutdown` resolves.
async fn follow(
    subscriber: &Subscriber,
    dashboard: &SharedDashboard,
    url: &str,
    report_every: Duration,
    shutdown: impl Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    let mut connected = subscriber.connected_watch();
    let mut report = tokio::time::interval(report_every);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = connected.changed() => {
                if changed.is_err() {
                    break;
                }
                let up = *connected.borrow_and_update();
                if up {
                    tracing::info!(url, "live");
                } else {
                    tracing::warn!(
                        error = subscriber.last_error().as_deref().unwrap_or("closed"),
                        "hub unreachable, showing synthetic data"
                    );
                }
            }
            _ = report.tick() => log_summary(&dashboard.snapshot(), subscriber.is_connected()),
        }
    }
}

fn log_summary(state: &DashboardState, live: bool) {
    let latest = state.performance.latest();
    tracing::info!(
        live,
        accuracy = format_args!("{:.2}", state.metrics.accuracy),
        data_points = state.metrics.data_points as u64,
        active_models = state.metrics.active_models as u64,
        processing_speed = format_args!("{:.0}", state.metrics.processing_speed),
        latest_loss = latest.map(|p| p.loss),
        insights = state.insights.len(),
        "dashboard"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn follow_stops_on_shutdown_after_many_reports() {
        let url = "ws://127.0.0.1:1/ws";
        let subscriber = Subscriber::connect(url).unwrap();
        let dashboard = SharedDashboard::new(DashboardState::new());

        let (fire, fired) = oneshot::channel::<()>();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = fire.send(());
        });

        let shutdown = async move {
            let _ = fired.await;
        };
        tokio::time::timeout(
            Duration::from_secs(2),
            follow(&subscriber, &dashboard, url, Duration::from_millis(5), shutdown),
        )
        .await
        .expect("shutdown signal was missed");

        subscriber.shutdown().await;
    }
}
