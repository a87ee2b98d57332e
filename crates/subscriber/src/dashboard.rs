//! Dashboard view model fed by socket events and fallback ticks.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{Duration as ChronoDuration, Utc};
use rand::{Rng, RngCore};
use serde::Deserialize;
use serde_json::Value;

use pulseboard_protocol::Envelope;
use pulseboard_protocol::constants::PERFORMANCE_HISTORY;
use pulseboard_protocol::events;

use crate::fallback::{FallbackSink, FallbackTick};
use crate::history::History;
use crate::subscriber::Subscriber;
use crate::subscriptions::Subscription;

/// Metric keys shared by `metrics_updated` payloads and fallback ticks.
pub mod metric {
    pub const ACCURACY: &str = "accuracy";
    pub const DATA_POINTS: &str = "data_points";
    pub const ACTIVE_MODELS: &str = "active_models";
    pub const PROCESSING_SPEED: &str = "processing_speed";
}

/// Headline numbers shown on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DashboardMetrics {
    /// Percent, 0-100.
    pub accuracy: f64,
    pub data_points: f64,
    pub active_models: f64,
    pub processing_speed: f64,
}

impl Default for DashboardMetrics {
    fn default() -> Self {
        Self {
            accuracy: 94.7,
            data_points: 2_400_000.0,
            active_models: 12.0,
            processing_speed: 1200.0,
        }
    }
}

impl DashboardMetrics {
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            metric::ACCURACY => Some(self.accuracy),
            metric::DATA_POINTS => Some(self.data_points),
            metric::ACTIVE_MODELS => Some(self.active_models),
            metric::PROCESSING_SPEED => Some(self.processing_speed),
            _ => None,
        }
    }

    /// Sets one field by name. Returns `false` for unknown names.
    pub fn set(&mut self, name: &str, value: f64) -> bool {
        let slot = match name {
            metric::ACCURACY => &mut self.accuracy,
            metric::DATA_POINTS => &mut self.data_points,
            metric::ACTIVE_MODELS => &mut self.active_models,
            metric::PROCESSING_SPEED => &mut self.processing_speed,
            _ => return false,
        };
        *slot = value;
        true
    }
}

/// One point on the performance chart.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPerformance {
    pub timestamp: String,
    pub accuracy: f64,
    pub loss: f64,
    pub f1_score: f64,
}

impl ModelPerformance {
    pub fn now(accuracy: f64, loss: f64, f1_score: f64) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            accuracy,
            loss,
            f1_score,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SystemMetric {
    metric_type: String,
    value: f64,
}

/// Everything the dashboard renders.
#[derive(Debug, Clone)]
pub struct DashboardState {
    pub metrics: DashboardMetrics,
    pub performance: History<ModelPerformance>,
    /// Newest first.
    pub insights: Vec<Value>,
    /// Payload of the last `metrics_updated` event.
    pub system_metrics: Value,
}

impl Default for DashboardState {
    fn default() -> Self {
        Self {
            metrics: DashboardMetrics::default(),
            performance: History::new(PERFORMANCE_HISTORY),
            insights: Vec::new(),
            system_metrics: Value::Array(Vec::new()),
        }
    }
}

impl DashboardState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fills the chart with one synthetic sample per hour for the last day.
    pub fn seed_history(&mut self, rng: &mut dyn RngCore) {
        let now = Utc::now();
        for hours_ago in (0..PERFORMANCE_HISTORY as i64).rev() {
            let at = now - ChronoDuration::hours(hours_ago);
            self.performance.push(ModelPerformance {
                timestamp: at.to_rfc3339(),
                accuracy: 0.85 + rng.gen_range(0.0..0.15),
                loss: 0.1 + rng.gen_range(0.0..0.05),
                f1_score: 0.88 + rng.gen_range(0.0..0.12),
            });
        }
    }

    /// Applies one socket event. Returns whether the state changed.
    pub fn apply_envelope(&mut self, envelope: &Envelope) -> bool {
        match envelope.event_type.as_str() {
            events::METRICS_UPDATED => self.apply_metrics(&envelope.data),
            events::TRAINING_UPDATED => self.apply_training(&envelope.data),
            events::INSIGHT_CREATED => {
                self.insights.insert(0, envelope.data.clone());
                true
            }
            _ => false,
        }
    }

    fn apply_metrics(&mut self, data: &Value) -> bool {
        self.system_metrics = data.clone();
        let Some(items) = data.as_array() else {
            tracing::debug!("metrics_updated payload is not an array");
            return true;
        };

        for item in items {
            let Ok(m) = SystemMetric::deserialize(item) else {
                continue;
            };
            let value = if m.metric_type == metric::ACCURACY {
                m.value * 100.0
            } else {
                m.value
            };
            self.metrics.set(&m.metric_type, value);
        }
        true
    }

    fn apply_training(&mut self, data: &Value) -> bool {
        let updates = &data["updates"];
        let accuracy = updates["currentAccuracy"].as_f64().unwrap_or(0.0);
        let loss = updates["currentLoss"].as_f64().unwrap_or(0.0);
        self.performance
            .push(ModelPerformance::now(accuracy, loss, accuracy * 0.95));
        true
    }

    /// Overwrites the metrics carried by `tick` and appends its sample.
    pub fn apply_fallback(&mut self, tick: &FallbackTick) {
        for (name, value) in &tick.metrics {
            self.metrics.set(name, *value);
        }
        self.performance.push(tick.sample.clone());
    }

    /// Sets one headline metric directly.
    pub fn update_metric(&mut self, name: &str, value: f64) -> bool {
        self.metrics.set(name, value)
    }

    /// Prepends a locally created insight, stamping `id` and `createdAt`.
    pub fn add_insight(&mut self, mut insight: Value) {
        if let Some(obj) = insight.as_object_mut() {
            let now = Utc::now();
            obj.insert("id".into(), Value::from(now.timestamp_millis()));
            obj.insert("createdAt".into(), Value::from(now.to_rfc3339()));
        }
        self.insights.insert(0, insight);
    }
}

/// Dashboard state shared between handlers and the fallback ticker.
#[derive(Debug, Clone, Default)]
pub struct SharedDashboard(Arc<Mutex<DashboardState>>);

impl SharedDashboard {
    pub fn new(state: DashboardState) -> Self {
        Self(Arc::new(Mutex::new(state)))
    }

    pub fn lock(&self) -> MutexGuard<'_, DashboardState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> DashboardState {
        self.lock().clone()
    }

    /// Routes the dashboard's three event types from `subscriber` into this
    /// state. Keep the returned subscriptions to unsubscribe on teardown.
    pub fn bind(&self, subscriber: &Subscriber) -> Vec<Subscription> {
        [
            events::METRICS_UPDATED,
            events::TRAINING_UPDATED,
            events::INSIGHT_CREATED,
        ]
        .into_iter()
        .map(|event_type| {
            let state = self.clone();
            subscriber.subscribe(event_type, move |data| {
                let envelope = Envelope::new(event_type, data.clone());
                state.lock().apply_envelope(&envelope);
            })
        })
        .collect()
    }
}

impl FallbackSink for SharedDashboard {
    fn current(&self, metric: &str) -> Option<f64> {
        self.lock().metrics.get(metric)
    }

    fn apply(&self, tick: FallbackTick) {
        self.lock().apply_fallback(&tick);
    }
}
