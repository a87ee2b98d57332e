//! Transport dialing.

use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message};

use pulseboard_protocol::constants::WS_MAX_MESSAGE_SIZE;

use crate::SubscriberError;

/// Future returned by [`Connector::connect`].
pub type ConnectFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SubscriberError>> + Send + 'a>>;

/// Opens a fresh message transport for each connection attempt.
pub trait Connector: Send + Sync + 'static {
    type Transport: Stream<Item = Result<Message, tungstenite::Error>>
        + Sink<Message, Error = tungstenite::Error>
        + Send
        + Unpin
        + 'static;

    fn connect(&self) -> ConnectFuture<'_, Self::Transport>;
}

/// Dials a `ws://` or `wss://` URL.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Result<Self, SubscriberError> {
        let url = url.into();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(SubscriberError::InvalidUrl(url));
        }
        Ok(Self { url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    type Transport = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    fn connect(&self) -> ConnectFuture<'_, Self::Transport> {
        Box::pin(async move {
            let mut ws_config = WebSocketConfig::default();
            ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
            ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
            let (stream, _) =
                tokio_tungstenite::connect_async_with_config(self.url.as_str(), Some(ws_config), false)
                    .await?;
            Ok(stream)
        })
    }
}
