//! Hub WebSocket server.
//!
//! Listens on a TCP port, upgrades HTTP GET `/ws` to WebSocket and hands
//! every accepted socket to the shared [`Registry`]. Any other path is
//! refused with 404 during the handshake.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;

use pulseboard_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PATH};

use crate::ServerError;
use crate::connection;
use crate::hub::Hub;
use crate::registry::Registry;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind.
    pub bind: IpAddr,
    /// TCP port to listen on (0 = OS-assigned).
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
        }
    }
}

/// The hub WebSocket server.
///
/// Owns the [`Registry`] for its whole lifetime: created with the server,
/// drained by [`shutdown`](Self::shutdown).
pub struct HubServer {
    config: ServerConfig,
    registry: Arc<Registry>,
    hub: Hub,
    cancel: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
    running: AtomicBool,
}

impl HubServer {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let registry = Arc::new(Registry::new());
        Arc::new(Self {
            config,
            hub: Hub::new(registry.clone()),
            registry,
            cancel: CancellationToken::new(),
            local_addr: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    /// Producer handle for this server's connections.
    pub fn hub(&self) -> Hub {
        self.hub.clone()
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Token cancelled on shutdown. Producers can derive child tokens from it.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Returns the listening port (0 if not yet bound).
    pub async fn port(&self) -> u16 {
        self.local_addr.lock().await.map(|a| a.port()).unwrap_or(0)
    }

    /// Stops accepting and closes every held connection.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        let closed = self.registry.close_all();
        if closed > 0 {
            tracing::info!(closed, "closed client connections");
        }
    }

    /// Runs the accept loop until [`shutdown`](Self::shutdown).
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(ServerError::AlreadyRunning);
        }

        let addr = SocketAddr::new(self.config.bind, self.config.port);
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        tracing::info!("hub listening on ws://{local_addr}{WS_PATH}");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("server shutting down");
                    self.registry.close_all();
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    tracing::debug!(%peer_addr, "handshake failed: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            tracing::error!("accept error: {e}");
                        }
                    }
                }
            }
        }
    }

    /// Upgrades one TCP connection and registers it.
    async fn handle_connection(
        &self,
        stream: tokio::net::TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), ServerError> {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
        ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);

        let ws_stream =
            accept_hdr_async_with_config(stream, check_path, Some(ws_config)).await?;

        if self.cancel.is_cancelled() {
            return Ok(());
        }

        connection::spawn_connection(
            ws_stream,
            Some(peer_addr),
            self.registry.clone(),
            &self.cancel,
        );
        Ok(())
    }
}

/// Handshake callback: only `/ws` may upgrade.
fn check_path(req: &Request, resp: Response) -> Result<Response, ErrorResponse> {
    if req.uri().path() == WS_PATH {
        return Ok(resp);
    }
    tracing::debug!(path = %req.uri().path(), "rejecting upgrade on unknown path");
    let mut err = ErrorResponse::new(Some(format!("no WebSocket endpoint at {}", req.uri().path())));
    *err.status_mut() = StatusCode::NOT_FOUND;
    Err(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio_tungstenite::tungstenite::Message;

    async fn start() -> (Arc<HubServer>, tokio::task::JoinHandle<()>, u16) {
        let server = HubServer::new(ServerConfig {
            bind: Ipv4Addr::LOCALHOST.into(),
            port: 0,
        });
        let server2 = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            server2.run().await.unwrap();
        });

        // Wait for the server to bind.
        for _ in 0..100 {
            if server.port().await > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let port = server.port().await;
        assert!(port > 0, "should have bound to a dynamic port");
        (server, handle, port)
    }

    async fn wait_for_count(server: &HubServer, n: usize) {
        for _ in 0..200 {
            if server.registry().len() == n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} connections, have {}", server.registry().len());
    }

    #[tokio::test]
    async fn server_binds_dynamic_port() {
        let (server, handle, _port) = start().await;
        assert!(server.registry().is_empty());

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn second_run_is_rejected() {
        let (server, handle, _port) = start().await;
        assert!(matches!(server.run().await, Err(ServerError::AlreadyRunning)));

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn rejects_other_paths() {
        let (server, handle, port) = start().await;

        let result = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}/other")).await;
        assert!(result.is_err());
        assert!(server.registry().is_empty());

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn broadcast_reaches_every_client() {
        let (server, handle, port) = start().await;
        let url = format!("ws://127.0.0.1:{port}/ws");

        let (mut a, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let (mut b, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        wait_for_count(&server, 2).await;

        let report = server
            .hub()
            .emit("model_created", serde_json::json!({"id": 1, "name": "resnet"}));
        assert_eq!(report.delivered, 2);

        let recv_text = |msg: Message| match msg {
            Message::Text(t) => t.to_string(),
            other => panic!("expected text, got {other:?}"),
        };
        let ta = recv_text(a.next().await.unwrap().unwrap());
        let tb = recv_text(b.next().await.unwrap().unwrap());
        assert_eq!(ta, tb);
        assert!(ta.contains("\"type\":\"model_created\""));

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn closed_client_is_evicted() {
        let (server, handle, port) = start().await;
        let url = format!("ws://127.0.0.1:{port}/ws");

        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        wait_for_count(&server, 1).await;

        ws.close(None).await.unwrap();
        wait_for_count(&server, 0).await;

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn client_messages_do_not_break_connection() {
        let (server, handle, port) = start().await;
        let url = format!("ws://127.0.0.1:{port}/ws");

        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        wait_for_count(&server, 1).await;

        ws.send(Message::Text("garbage".into())).await.unwrap();
        ws.send(Message::Text(r#"{"type":"hello","data":{}}"#.into()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.registry().len(), 1);

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_closes_held_connections() {
        let (server, handle, port) = start().await;
        let url = format!("ws://127.0.0.1:{port}/ws");

        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        wait_for_count(&server, 1).await;

        server.shutdown();
        handle.await.unwrap();
        assert!(server.registry().is_empty());

        // The client observes the close (close frame or stream end).
        let next = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("client should see the close");
        assert!(matches!(next, None | Some(Ok(Message::Close(_))) | Some(Err(_))));
    }
}
