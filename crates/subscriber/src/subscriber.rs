//! Reconnecting subscriber.
//!
//! A [`Subscriber`] owns one background task that keeps a single transport
//! alive. The task cycles `Connecting → Open → Closed → Connecting` with a
//! fixed [`RECONNECT_DELAY`] after every close or failed attempt, until
//! [`Subscriber::shutdown`] moves it to `Shutdown`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::{Sink, SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use pulseboard_protocol::Envelope;
use pulseboard_protocol::constants::{RECONNECT_DELAY, SEND_BUFFER_SIZE, WS_CLOSE_TIMEOUT};

use crate::SubscriberError;
use crate::connector::{Connector, WsConnector};
use crate::subscriptions::{Subscription, SubscriptionTable};

/// Lifecycle of the subscriber's transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closed,
    Shutdown,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    table: Arc<SubscriptionTable>,
    connected: watch::Sender<bool>,
    state: Mutex<ConnectionState>,
    last_error: Mutex<Option<String>>,
    last_message: Mutex<Option<Envelope>>,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        *lock(&self.state) = state;
    }

    /// Notifies watchers only when the flag actually flips.
    fn set_connected(&self, connected: bool) {
        self.connected.send_if_modified(|current| {
            let changed = *current != connected;
            *current = connected;
            changed
        });
    }

    fn on_open(&self, outbound: mpsc::Sender<Message>) {
        *lock(&self.outbound) = Some(outbound);
        *lock(&self.last_error) = None;
        self.set_state(ConnectionState::Open);
        self.set_connected(true);
    }

    /// Stops accepting outbound frames for the transport being torn down.
    fn release(&self) {
        lock(&self.outbound).take();
        self.set_connected(false);
    }

    fn on_closed(&self, error: Option<String>) {
        self.release();
        self.set_state(ConnectionState::Closed);
        if let Some(e) = error {
            *lock(&self.last_error) = Some(e);
        }
    }

    fn on_shutdown(&self) {
        self.release();
        self.set_state(ConnectionState::Shutdown);
    }

    fn handle_text(&self, text: &str) {
        let envelope = match Envelope::from_json(text) {
            Ok(env) => env,
            Err(e) => {
                warn!("dropping malformed message: {e}");
                return;
            }
        };

        *lock(&self.last_message) = Some(envelope.clone());
        if !self.table.dispatch(&envelope.event_type, &envelope.data) {
            trace!(event_type = %envelope.event_type, "no handler registered");
        }
    }
}

enum SessionEnd {
    Cancelled,
    Closed(Option<String>),
}

/// Writes one frame unless `cancel` fires first.
async fn write<T>(transport: &mut T, msg: Message, cancel: &CancellationToken) -> Option<SessionEnd>
where
    T: Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let sent = tokio::select! {
        _ = cancel.cancelled() => return Some(SessionEnd::Cancelled),
        result = transport.send(msg) => result,
    };
    sent.err().map(|e| SessionEnd::Closed(Some(e.to_string())))
}

/// Client half of the event distribution layer.
///
/// Starts connecting as soon as it is spawned. Handlers registered with
/// [`subscribe`](Self::subscribe) survive reconnects.
pub struct Subscriber {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Subscriber {
    /// Spawns the connection task using `connector` for every attempt.
    pub fn spawn<C: Connector>(connector: C) -> Self {
        let (connected, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            table: Arc::new(SubscriptionTable::new()),
            connected,
            state: Mutex::new(ConnectionState::Connecting),
            last_error: Mutex::new(None),
            last_message: Mutex::new(None),
            outbound: Mutex::new(None),
        });
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(connector, shared.clone(), cancel.clone()));

        Self {
            shared,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Spawns a subscriber dialing `url` with the default WebSocket connector.
    pub fn connect(url: &str) -> Result<Self, SubscriberError> {
        Ok(Self::spawn(WsConnector::new(url)?))
    }

    /// Registers `handler` for `event_type`, replacing any previous handler.
    pub fn subscribe<F>(&self, event_type: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.shared.table.subscribe(event_type, handler)
    }

    /// Queues `envelope` on the open transport.
    ///
    /// Fails with [`SubscriberError::Closed`] when not connected; nothing is
    /// kept for a later connection.
    pub fn try_send(&self, envelope: &Envelope) -> Result<(), SubscriberError> {
        let tx = lock(&self.shared.outbound)
            .clone()
            .ok_or(SubscriberError::Closed)?;
        let text = envelope.to_json()?;
        tx.try_send(Message::Text(text.into()))
            .map_err(|_| SubscriberError::Closed)
    }

    /// Like [`try_send`](Self::try_send) but only logs failures.
    pub fn send(&self, envelope: &Envelope) {
        if let Err(e) = self.try_send(envelope) {
            warn!(event_type = %envelope.event_type, "message not sent: {e}");
        }
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.connected.borrow()
    }

    pub fn state(&self) -> ConnectionState {
        *lock(&self.shared.state)
    }

    /// Description of the most recent transport error, cleared on open.
    pub fn last_error(&self) -> Option<String> {
        lock(&self.shared.last_error).clone()
    }

    /// The most recent envelope received.
    pub fn last_message(&self) -> Option<Envelope> {
        lock(&self.shared.last_message).clone()
    }

    /// Receiver that observes every change of the connected flag.
    pub fn connected_watch(&self) -> watch::Receiver<bool> {
        self.shared.connected.subscribe()
    }

    /// Stops the connection task and waits for it to exit.
    ///
    /// A pending reconnect delay is cancelled; an open transport is closed.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = lock(&self.task).take();
        if let Some(task) = task
            && let Err(e) = task.await
        {
            warn!("subscriber task failed: {e}");
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run<C: Connector>(connector: C, shared: Arc<Shared>, cancel: CancellationToken) {
    loop {
        shared.set_state(ConnectionState::Connecting);
        debug!("connecting");

        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            result = connector.connect() => result,
        };

        let error = match attempt {
            Ok(transport) => {
                let (tx, rx) = mpsc::channel(SEND_BUFFER_SIZE);
                shared.on_open(tx);
                info!("connected");
                match session(transport, rx, &shared, &cancel).await {
                    SessionEnd::Cancelled => break,
                    SessionEnd::Closed(error) => error,
                }
            }
            Err(e) => Some(e.to_string()),
        };

        match &error {
            Some(e) => warn!("connection lost: {e}; retrying in {}s", RECONNECT_DELAY.as_secs()),
            None => info!("connection closed; retrying in {}s", RECONNECT_DELAY.as_secs()),
        }
        shared.on_closed(error);

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(RECONNECT_DELAY) => {}
        }
    }

    shared.on_shutdown();
    debug!("subscriber stopped");
}

/// Pumps one open transport until it closes or `cancel` fires.
async fn session<T>(
    mut transport: T,
    mut outbound: mpsc::Receiver<Message>,
    shared: &Shared,
    cancel: &CancellationToken,
) -> SessionEnd
where
    T: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let end = loop {
        tokio::select! {
            _ = cancel.cancelled() => break SessionEnd::Cancelled,

            Some(msg) = outbound.recv() => {
                if let Some(end) = write(&mut transport, msg, cancel).await {
                    break end;
                }
            }

            frame = transport.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => shared.handle_text(&text),
                    Some(Ok(Message::Ping(data))) => {
                        if let Some(end) = write(&mut transport, Message::Pong(data), cancel).await {
                            break end;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "received close frame");
                        break SessionEnd::Closed(None);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break SessionEnd::Closed(Some(e.to_string())),
                    None => break SessionEnd::Closed(None),
                }
            }
        }
    };

    shared.release();
    if tokio::time::timeout(WS_CLOSE_TIMEOUT, transport.close()).await.is_err() {
        debug!("close handshake timed out");
    }
    end
}
