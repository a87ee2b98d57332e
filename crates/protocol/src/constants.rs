use std::time::Duration;

/// Path the hub upgrades to WebSocket.
pub const WS_PATH: &str = "/ws";

/// Fixed delay between a close and the next connection attempt.
///
/// There is deliberately no backoff and no retry cap.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Interval of the client-side fallback ticker while disconnected.
pub const FALLBACK_INTERVAL: Duration = Duration::from_secs(5);

/// How often the hub pings each connection.
pub const WS_PING_PERIOD: Duration = Duration::from_secs(20);

/// How long a graceful close may take before the transport is dropped.
pub const WS_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Maximum message size in bytes (4 MiB).
pub const WS_MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Outbound frames buffered per connection before writes start failing.
pub const SEND_BUFFER_SIZE: usize = 256;

/// Number of performance samples the dashboard keeps.
pub const PERFORMANCE_HISTORY: usize = 24;

/// Period of the server-side system metrics job.
pub const METRICS_INTERVAL: Duration = Duration::from_secs(30);

/// Period of one simulated training epoch.
pub const TRAINING_TICK: Duration = Duration::from_secs(5);
