//! Per-connection read/write pumps.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use pulseboard_protocol::{Envelope, events};
use pulseboard_protocol::constants::{
    SEND_BUFFER_SIZE, WS_CLOSE_TIMEOUT, WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD,
};

use crate::registry::{ConnectionHandle, ConnectionId, Registry};

/// Registers a freshly upgraded socket and starts its pumps.
///
/// The entry is removed from `registry` exactly when the read pump exits,
/// which happens on close frame, stream end, read error, write error (the
/// write pump cancels the shared token) or server shutdown.
pub(crate) fn spawn_connection<S>(
    ws_stream: S,
    remote_addr: Option<SocketAddr>,
    registry: Arc<Registry>,
    server_cancel: &CancellationToken,
) -> ConnectionHandle
where
    S: futures_util::Stream<Item = Result<Message, tungstenite::Error>>
        + futures_util::Sink<Message, Error = tungstenite::Error>
        + Send
        + 'static,
{
    let (tx, rx) = mpsc::channel::<Message>(SEND_BUFFER_SIZE);
    let cancel = server_cancel.child_token();
    let conn = ConnectionHandle::new(ConnectionId::new(), remote_addr, tx, cancel.clone());
    let id = conn.id();

    registry.add(conn.clone());
    tracing::info!(conn = %id, peer = ?remote_addr, total = registry.len(), "client connected");

    let (sink, stream) = ws_stream.split();

    tokio::spawn(write_pump(sink, rx, cancel.clone(), id));

    let read_conn = conn.clone();
    tokio::spawn(async move {
        read_pump(stream, &read_conn, cancel.clone()).await;
        cancel.cancel();
        registry.remove(id);
        tracing::info!(conn = %id, total = registry.len(), "client disconnected");
    });

    conn
}

/// Drains the outbound queue and sends keepalive pings.
async fn write_pump<S>(
    mut sink: S,
    mut rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
    id: ConnectionId,
) where
    S: futures_util::Sink<Message, Error = tungstenite::Error> + Send + Unpin,
{
    let mut ping_interval = tokio::time::interval(WS_PING_PERIOD);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping_interval.tick().await;

    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            msg = rx.recv() => match msg {
                Some(frame) => frame,
                None => break,
            },
            _ = ping_interval.tick() => Message::Ping(Vec::new().into()),
        };

        // A peer that stops reading must not pin the pump past shutdown.
        let sent = tokio::select! {
            _ = cancel.cancelled() => break,
            result = sink.send(frame) => result,
        };
        if let Err(e) = sent {
            tracing::warn!(conn = %id, "write error: {e}");
            break;
        }
    }

    // Wake the read pump so the registry entry goes away.
    cancel.cancel();
    if tokio::time::timeout(WS_CLOSE_TIMEOUT, sink.close()).await.is_err() {
        tracing::debug!(conn = %id, "close handshake timed out");
    }
}

/// Reads frames until the peer goes away. Inbound envelopes are logged only.
async fn read_pump<S>(mut stream: S, conn: &ConnectionHandle, cancel: CancellationToken)
where
    S: futures_util::Stream<Item = Result<Message, tungstenite::Error>> + Send + Unpin,
{
    let id = conn.id();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => handle_text(id, &text),
                    Some(Ok(Message::Ping(data))) => {
                        let _ = conn.try_send(Message::Pong(data));
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::debug!(conn = %id, "received close frame");
                        break;
                    }
                    Some(Ok(_)) => {} // Binary, pong and raw frames are ignored.
                    Some(Err(e)) => {
                        tracing::warn!(conn = %id, "read error: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

fn handle_text(id: ConnectionId, text: &str) {
    if text.len() > WS_MAX_MESSAGE_SIZE {
        tracing::warn!(conn = %id, len = text.len(), "inbound message too large, dropping");
        return;
    }
    match Envelope::from_json(text) {
        Ok(env) => tracing::debug!(
            conn = %id,
            event_type = %env.event_type,
            known = events::is_known(&env.event_type),
            "client message"
        ),
        Err(e) => tracing::warn!(conn = %id, "invalid client message: {e}"),
    }
}
