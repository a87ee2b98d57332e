//! Demo event producers.
//!
//! Stand-ins for route handlers and periodic jobs: they only ever talk to
//! the core through [`Hub::emit`].

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use pulseboard_protocol::constants::{METRICS_INTERVAL, TRAINING_TICK};
use pulseboard_protocol::events;

use crate::hub::Hub;

/// Periodically broadcasts `metrics_updated` with four system metrics.
pub struct MetricsJob {
    hub: Hub,
    interval: Duration,
}

impl MetricsJob {
    pub fn new(hub: Hub) -> Self {
        Self {
            hub,
            interval: METRICS_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs until `cancel` fires. The first batch goes out immediately.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            let mut next_id: u64 = 1;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let metrics = sample_metrics(&mut next_id);
                        let report = self.hub.emit(events::METRICS_UPDATED, metrics);
                        tracing::debug!(delivered = report.delivered, "system metrics broadcast");
                    }
                }
            }
            tracing::debug!("metrics job stopped");
        })
    }
}

fn sample_metrics(next_id: &mut u64) -> Value {
    let mut rng = rand::thread_rng();
    let now = Utc::now().to_rfc3339();
    let samples = [
        ("accuracy", 0.94 + rng.gen_range(0.0..0.06), "percentage"),
        ("data_points", 2_400_000.0 + rng.gen_range(0.0..100_000.0), "count"),
        ("active_models", f64::from(12 + rng.gen_range(0..3u32)), "count"),
        ("processing_speed", 1200.0 + rng.gen_range(0.0..400.0), "records/second"),
    ];

    let items = samples
        .into_iter()
        .map(|(metric_type, value, unit)| {
            let id = *next_id;
            *next_id += 1;
            json!({
                "id": id,
                "metricType": metric_type,
                "value": value,
                "unit": unit,
                "timestamp": now,
            })
        })
        .collect();
    Value::Array(items)
}

/// Parameters of one simulated training run.
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub session_id: u64,
    pub model_id: u64,
    pub epochs: u32,
    pub tick: Duration,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            session_id: 1,
            model_id: 1,
            epochs: 200,
            tick: TRAINING_TICK,
        }
    }
}

/// Progress after one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Epoch {
    pub number: u32,
    pub loss: f64,
    pub accuracy: f64,
    pub completed: bool,
}

/// Loss/accuracy trajectory of a training run.
#[derive(Debug, Clone)]
struct Trajectory {
    epoch: u32,
    total: u32,
    loss: f64,
    accuracy: f64,
}

impl Trajectory {
    fn new(total: u32) -> Self {
        Self {
            epoch: 0,
            total,
            loss: 1.0,
            accuracy: 0.5,
        }
    }

    fn step(&mut self, rng: &mut impl Rng) -> Epoch {
        self.epoch += 1;
        self.loss = (self.loss * 0.995).max(0.001);
        self.accuracy = (self.accuracy + rng.gen_range(0.0..0.01)).min(0.999);
        Epoch {
            number: self.epoch,
            loss: self.loss,
            accuracy: self.accuracy,
            completed: self.epoch >= self.total,
        }
    }
}

/// Emits `training_started`, one `training_updated` per tick, and an
/// `insight_created` when the last epoch completes.
pub struct TrainingSimulation {
    hub: Hub,
    config: TrainingConfig,
}

impl TrainingSimulation {
    pub fn new(hub: Hub, config: TrainingConfig) -> Self {
        Self { hub, config }
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    async fn run(self, cancel: CancellationToken) {
        let TrainingConfig {
            session_id,
            model_id,
            epochs,
            tick,
        } = self.config;

        self.hub.emit(
            events::TRAINING_STARTED,
            json!({
                "modelId": model_id,
                "sessionId": session_id,
                "config": { "epochs": epochs },
            }),
        );
        tracing::info!(session_id, model_id, epochs, "training simulation started");

        let mut trajectory = Trajectory::new(epochs);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(session_id, "training simulation cancelled");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let epoch = trajectory.step(&mut rand::thread_rng());
            let status = if epoch.completed { "completed" } else { "running" };
            self.hub.emit(
                events::TRAINING_UPDATED,
                json!({
                    "sessionId": session_id,
                    "updates": {
                        "currentEpoch": epoch.number,
                        "currentLoss": epoch.loss,
                        "currentAccuracy": epoch.accuracy,
                        "status": status,
                    },
                }),
            );

            if epoch.completed {
                self.hub.emit(
                    events::INSIGHT_CREATED,
                    json!({
                        "type": "training_complete",
                        "title": "Model Training Completed",
                        "description": format!(
                            "Model {model_id} finished {epochs} epochs at {:.1}% accuracy (loss {:.4}).",
                            epoch.accuracy * 100.0,
                            epoch.loss
                        ),
                        "priority": "high",
                        "confidence": 0.9,
                        "metadata": { "modelId": model_id, "sessionId": session_id },
                        "createdAt": Utc::now().to_rfc3339(),
                    }),
                );
                tracing::info!(session_id, accuracy = epoch.accuracy, "training simulation completed");
                return;
            }
        }
    }
}
