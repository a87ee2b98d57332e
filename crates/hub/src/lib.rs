//! Server half of the Pulseboard event distribution layer.
//!
//! A [`HubServer`] accepts WebSocket upgrades at `/ws` and keeps every
//! live connection in an explicitly owned [`Registry`]. Producers hold a
//! cloneable [`Hub`] and call [`Hub::broadcast`] whenever state changes;
//! the envelope is serialized once and queued on every open connection.

mod connection;
pub mod hub;
pub mod producers;
pub mod registry;
mod server;

pub use hub::{BroadcastReport, Hub};
pub use producers::{MetricsJob, TrainingConfig, TrainingSimulation};
pub use registry::{ConnectionHandle, ConnectionId, Registry, SendError, Visit};
pub use server::{HubServer, ServerConfig};

/// Errors produced by the hub server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("server already running")]
    AlreadyRunning,
}
