//! Authoritative set of open server-side connections.
//!
//! The registry never owns a socket. Each entry is a [`ConnectionHandle`]:
//! the sending half of the connection's outbound queue plus the token that
//! stops its pumps. The pumps own the socket and remove the entry when they
//! exit, so the registry always mirrors the set of open transports.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identifier assigned to a connection at handshake time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable.
        write!(f, "{}", &self.0.simple().to_string()[..8])
    }
}

/// Error returned when a frame cannot be queued on a connection.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("send buffer full")]
    Full,
    #[error("connection closed")]
    Closed,
}

/// Non-owning handle to a live connection.
///
/// Cloneable and cheap: wraps an `mpsc::Sender` and a cancellation token.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    tx: mpsc::Sender<Message>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(
        id: ConnectionId,
        remote_addr: Option<SocketAddr>,
        tx: mpsc::Sender<Message>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            remote_addr,
            tx,
            cancel,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Returns `true` while the connection can accept outbound frames.
    pub fn is_open(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }

    /// Queues a frame without waiting.
    pub fn try_send(&self, msg: Message) -> Result<(), SendError> {
        if self.cancel.is_cancelled() {
            return Err(SendError::Closed);
        }
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Signals the connection's pumps to stop.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Tally returned by [`Registry::for_each`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Visit {
    /// Open connections passed to the callback.
    pub visited: usize,
    /// Held connections that were already closing.
    pub skipped: usize,
}

/// Live set of open connections.
#[derive(Debug, Default)]
pub struct Registry {
    conns: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConnectionId, ConnectionHandle>> {
        self.conns.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a connection. Returns `false` if it was already present.
    pub fn add(&self, conn: ConnectionHandle) -> bool {
        let mut conns = self.lock();
        if conns.contains_key(&conn.id) {
            tracing::debug!(conn = %conn.id, "duplicate registration ignored");
            return false;
        }
        conns.insert(conn.id, conn);
        true
    }

    /// Removes a connection. Returns `false` if it was not present.
    pub fn remove(&self, id: ConnectionId) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.lock().values().cloned().collect()
    }

    /// Calls `f` once per open connection, in unspecified order.
    ///
    /// Works on a snapshot taken under the lock, so `f` may trigger closes
    /// or registrations without deadlocking. Connections that closed after
    /// the snapshot are skipped and counted.
    pub fn for_each<F>(&self, mut f: F) -> Visit
    where
        F: FnMut(&ConnectionHandle),
    {
        let mut visit = Visit::default();
        for conn in self.snapshot() {
            if conn.is_open() {
                f(&conn);
                visit.visited += 1;
            } else {
                visit.skipped += 1;
            }
        }
        visit
    }

    /// Closes every held connection and empties the registry.
    pub fn close_all(&self) -> usize {
        let drained: Vec<ConnectionHandle> = self.lock().drain().map(|(_, c)| c).collect();
        for conn in &drained {
            conn.close();
        }
        drained.len()
    }
}
