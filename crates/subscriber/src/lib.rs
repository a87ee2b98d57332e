//! Client half of the Pulseboard event distribution layer.
//!
//! A [`Subscriber`] keeps one WebSocket to the hub open, reconnecting on a
//! fixed delay, and dispatches each inbound envelope to the handler
//! registered for its type. While the link is down a [`FallbackTicker`]
//! keeps the [`dashboard`] moving with synthetic values.

pub mod connector;
pub mod dashboard;
pub mod fallback;
pub mod history;
pub mod subscriber;
pub mod subscriptions;

pub use connector::{ConnectFuture, Connector, WsConnector};
pub use dashboard::{DashboardMetrics, DashboardState, ModelPerformance, SharedDashboard};
pub use fallback::{FallbackGenerator, FallbackSink, FallbackTick, FallbackTicker, Perturbation};
pub use subscriber::{ConnectionState, Subscriber};
pub use subscriptions::{Subscription, SubscriptionTable};

/// Errors on the subscriber's connect and send paths.
#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("connection closed")]
    Closed,
}
