//! Synthetic updates while the transport is down.
//!
//! The [`FallbackTicker`] idles while the subscriber is connected. When the
//! connected flag drops to `false` it starts a fresh interval and, on every
//! tick, nudges the last known metric values with a [`Perturbation`] and
//! hands the result to a [`FallbackSink`].

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use rand::{Rng, RngCore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use pulseboard_protocol::constants::FALLBACK_INTERVAL;

use crate::dashboard::{ModelPerformance, metric};

/// Produces the next value of one metric.
pub trait Perturbation: Send + Sync {
    /// Returns a value derived from `last`, or a seed when `last` is `None`.
    fn next(&self, last: Option<f64>, rng: &mut dyn RngCore) -> f64;
}

/// Uniform step in `±step`, clamped to `[min, max]`.
#[derive(Debug, Clone, Copy)]
pub struct BoundedWalk {
    pub seed: f64,
    pub step: f64,
    pub min: f64,
    pub max: f64,
}

impl Perturbation for BoundedWalk {
    fn next(&self, last: Option<f64>, rng: &mut dyn RngCore) -> f64 {
        match last {
            Some(v) => (v + rng.gen_range(-self.step..=self.step)).clamp(self.min, self.max),
            None => self.seed,
        }
    }
}

/// Monotonic counter growing by a uniform integer in `[0, max_increment)`.
#[derive(Debug, Clone, Copy)]
pub struct Counter {
    pub seed: f64,
    pub max_increment: u64,
}

impl Perturbation for Counter {
    fn next(&self, last: Option<f64>, rng: &mut dyn RngCore) -> f64 {
        match last {
            Some(v) if self.max_increment > 0 => v + rng.gen_range(0..self.max_increment) as f64,
            Some(v) => v,
            None => self.seed,
        }
    }
}

/// With `probability`, moves by `±step`; never drops below `floor`.
#[derive(Debug, Clone, Copy)]
pub struct OccasionalStep {
    pub seed: f64,
    pub probability: f64,
    pub step: f64,
    pub floor: f64,
}

impl Perturbation for OccasionalStep {
    fn next(&self, last: Option<f64>, rng: &mut dyn RngCore) -> f64 {
        let Some(v) = last else {
            return self.seed;
        };
        if !rng.gen_bool(self.probability.clamp(0.0, 1.0)) {
            return v;
        }
        let delta = if rng.gen_bool(0.5) { self.step } else { -self.step };
        (v + delta).max(self.floor)
    }
}

/// One batch of synthetic values.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackTick {
    pub metrics: BTreeMap<String, f64>,
    pub sample: ModelPerformance,
}

/// Receives synthetic values and supplies the last known ones.
pub trait FallbackSink: Send + Sync + 'static {
    fn current(&self, metric: &str) -> Option<f64>;
    fn apply(&self, tick: FallbackTick);
}

/// The per-metric perturbations applied on each tick.
pub struct FallbackGenerator {
    metrics: Vec<(String, Box<dyn Perturbation>)>,
}

impl FallbackGenerator {
    pub fn empty() -> Self {
        Self {
            metrics: Vec::new(),
        }
    }

    /// Adds or replaces the perturbation for `name`.
    pub fn with_metric(mut self, name: &str, perturbation: impl Perturbation + 'static) -> Self {
        self.metrics.retain(|(n, _)| n != name);
        self.metrics.push((name.to_string(), Box::new(perturbation)));
        self
    }

    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        self.metrics.iter().map(|(n, _)| n.as_str())
    }

    /// Computes the next values from what `sink` currently holds.
    pub fn tick(&self, sink: &dyn FallbackSink, rng: &mut dyn RngCore) -> FallbackTick {
        let metrics = self
            .metrics
            .iter()
            .map(|(name, p)| (name.clone(), p.next(sink.current(name), rng)))
            .collect();
        FallbackTick {
            metrics,
            sample: synthetic_sample(rng),
        }
    }
}

impl Default for FallbackGenerator {
    fn default() -> Self {
        Self::empty()
            .with_metric(
                metric::ACCURACY,
                BoundedWalk {
                    seed: 94.7,
                    step: 0.25,
                    min: 85.0,
                    max: 99.0,
                },
            )
            .with_metric(
                metric::DATA_POINTS,
                Counter {
                    seed: 2_400_000.0,
                    max_increment: 1000,
                },
            )
            .with_metric(
                metric::ACTIVE_MODELS,
                OccasionalStep {
                    seed: 12.0,
                    probability: 0.1,
                    step: 1.0,
                    floor: 0.0,
                },
            )
            .with_metric(
                metric::PROCESSING_SPEED,
                BoundedWalk {
                    seed: 1200.0,
                    step: 50.0,
                    min: 800.0,
                    max: 2000.0,
                },
            )
    }
}

fn synthetic_sample(rng: &mut dyn RngCore) -> ModelPerformance {
    ModelPerformance::now(
        0.85 + rng.gen_range(0.0..0.15),
        0.05 + rng.gen_range(0.0..0.10),
        0.88 + rng.gen_range(0.0..0.12),
    )
}

/// Background task feeding a [`FallbackSink`] while disconnected.
pub struct FallbackTicker {
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FallbackTicker {
    /// Spawns with the default [`FALLBACK_INTERVAL`].
    pub fn spawn<S: FallbackSink>(
        connected: watch::Receiver<bool>,
        generator: FallbackGenerator,
        sink: S,
    ) -> Self {
        Self::spawn_with_period(connected, generator, sink, FALLBACK_INTERVAL)
    }

    pub fn spawn_with_period<S: FallbackSink>(
        connected: watch::Receiver<bool>,
        generator: FallbackGenerator,
        sink: S,
        period: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(connected, generator, sink, period, cancel.clone()));
        Self {
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Stops the ticker and waits for its task.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!("fallback ticker failed: {e}");
        }
    }
}

impl Drop for FallbackTicker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run<S: FallbackSink>(
    mut connected: watch::Receiver<bool>,
    generator: FallbackGenerator,
    sink: S,
    period: Duration,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            down = connected.wait_for(|c| !*c) => {
                if down.is_err() {
                    return;
                }
            }
        }

        debug!("transport down, fallback updates active");
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return,

                changed = connected.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if *connected.borrow_and_update() {
                        break;
                    }
                }

                _ = ticker.tick() => {
                    if *connected.borrow() {
                        break;
                    }
                    let tick = generator.tick(&sink, &mut rand::thread_rng());
                    trace!(metrics = ?tick.metrics, "fallback tick");
                    sink.apply(tick);
                }
            }
        }

        debug!("transport up, fallback updates paused");
    }
}
