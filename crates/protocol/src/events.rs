//! Event type names emitted by the dashboard producers.
//!
//! This is not a closed set. Subscribers must accept any string and
//! producers may introduce new names without touching this crate.

pub const METRICS_UPDATED: &str = "metrics_updated";
pub const TRAINING_UPDATED: &str = "training_updated";
pub const TRAINING_STARTED: &str = "training_started";
pub const INSIGHT_CREATED: &str = "insight_created";
pub const INSIGHT_RESOLVED: &str = "insight_resolved";
pub const DATASET_UPLOADED: &str = "dataset_uploaded";
pub const MODEL_CREATED: &str = "model_created";
pub const PREDICTION_MADE: &str = "prediction_made";

/// Every name listed above.
pub const KNOWN: [&str; 8] = [
    METRICS_UPDATED,
    TRAINING_UPDATED,
    TRAINING_STARTED,
    INSIGHT_CREATED,
    INSIGHT_RESOLVED,
    DATASET_UPLOADED,
    MODEL_CREATED,
    PREDICTION_MADE,
];

/// Returns `true` for names in [`KNOWN`]. Used for logging only.
pub fn is_known(event_type: &str) -> bool {
    KNOWN.contains(&event_type)
}
