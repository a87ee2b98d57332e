//! Broadcast fan-out.

use std::sync::Arc;

use serde_json::Value;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};

use pulseboard_protocol::Envelope;

use crate::registry::Registry;

/// Outcome of a single [`Hub::broadcast`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the frame was queued on.
    pub delivered: usize,
    /// Registered connections that were already closing.
    pub skipped: usize,
    /// Open connections whose queue rejected the frame.
    pub failed: usize,
}

/// Producer-facing handle to the connection registry.
///
/// Cloneable; every clone fans out to the same registry. Producers call
/// [`broadcast`](Self::broadcast) from any task, the call never blocks
/// and never fails.
#[derive(Debug, Clone)]
pub struct Hub {
    registry: Arc<Registry>,
}

impl Hub {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Number of connections currently registered.
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Serializes `envelope` once and queues it on every open connection.
    ///
    /// All recipients share the same buffer. A failure on one connection
    /// is logged and counted; the remaining connections still get the
    /// frame. Failing connections are left for their own pumps to evict.
    pub fn broadcast(&self, envelope: &Envelope) -> BroadcastReport {
        let text: Utf8Bytes = match envelope.to_json() {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::error!(event_type = %envelope.event_type, "failed to serialize envelope: {e}");
                return BroadcastReport::default();
            }
        };

        let mut report = BroadcastReport::default();
        let visit = self.registry.for_each(|conn| {
            match conn.try_send(Message::Text(text.clone())) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(conn = %conn.id(), event_type = %envelope.event_type, "broadcast write failed: {e}");
                }
            }
        });
        report.skipped = visit.skipped;

        tracing::trace!(
            event_type = %envelope.event_type,
            delivered = report.delivered,
            skipped = report.skipped,
            failed = report.failed,
            "broadcast"
        );
        report
    }

    /// Builds a timestamped envelope and broadcasts it.
    pub fn emit(&self, event_type: &str, data: Value) -> BroadcastReport {
        self.broadcast(&Envelope::now(event_type, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::handle;
    use serde_json::json;

    fn text_of(msg: Message) -> Utf8Bytes {
        match msg {
            Message::Text(t) => t,
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[test]
    fn every_recipient_gets_identical_bytes() {
        let registry = Arc::new(Registry::new());
        let hub = Hub::new(registry.clone());
        let mut receivers = Vec::new();
        for _ in 0..5 {
            let (conn, rx) = handle(8);
            registry.add(conn);
            receivers.push(rx);
        }

        let env = Envelope::now("training_updated", json!({"sessionId": 7, "updates": {"currentEpoch": 3}}));
        let report = hub.broadcast(&env);
        assert_eq!(report, BroadcastReport { delivered: 5, skipped: 0, failed: 0 });

        let frames: Vec<Utf8Bytes> = receivers
            .iter_mut()
            .map(|rx| text_of(rx.try_recv().unwrap()))
            .collect();

        let first = &frames[0];
        for frame in &frames {
            assert_eq!(frame.as_bytes(), first.as_bytes());
            // Serialized once: every frame points at the same buffer.
            assert_eq!(frame.as_str().as_ptr(), first.as_str().as_ptr());
        }
        assert_eq!(Envelope::from_json(first.as_str()).unwrap(), env);
    }

    #[test]
    fn failure_on_one_connection_does_not_stop_others() {
        let registry = Arc::new(Registry::new());
        let hub = Hub::new(registry.clone());

        let (full, _full_rx) = handle(1);
        full.try_send(Message::Text("filler".into())).unwrap();
        let (ok_a, mut rx_a) = handle(4);
        let (ok_b, mut rx_b) = handle(4);
        registry.add(full);
        registry.add(ok_a);
        registry.add(ok_b);

        let report = hub.emit("model_created", json!({"id": 1}));

        assert_eq!(report, BroadcastReport { delivered: 2, skipped: 0, failed: 1 });
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn closed_connections_are_skipped_silently() {
        let registry = Arc::new(Registry::new());
        let hub = Hub::new(registry.clone());
        let (closed, _rx) = handle(4);
        closed.close();
        registry.add(closed);

        let report = hub.emit("insight_resolved", json!({"insightId": 3}));
        assert_eq!(report, BroadcastReport { delivered: 0, skipped: 1, failed: 0 });
    }

    #[test]
    fn broadcast_without_connections_is_noop() {
        let hub = Hub::new(Arc::new(Registry::new()));
        assert_eq!(hub.emit("metrics_updated", json!([])), BroadcastReport::default());
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn hub_keeps_no_history() {
        let registry = Arc::new(Registry::new());
        let hub = Hub::new(registry.clone());
        hub.emit("dataset_uploaded", json!({"id": 2}));

        // A connection registered after the broadcast sees nothing.
        let (late, mut rx) = handle(4);
        registry.add(late);
        assert!(rx.try_recv().is_err());
    }
}
