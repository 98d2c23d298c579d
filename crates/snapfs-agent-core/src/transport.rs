//! Bidirectional frame transport to the gateway.
//!
//! The consumer only depends on [`Connector`]/[`Connection`]; the WebSocket
//! implementation below is what the agent binary uses.

use crate::error::Error;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportMessage {
    Text(String),
    /// Peer closed the stream, with its reason if it gave one.
    Close(Option<String>),
    /// Binary and control frames. Pings are answered by the transport itself.
    Other,
}

#[async_trait]
pub trait Connection: Send {
    /// Next inbound frame. `None` once the stream has ended.
    async fn recv(&mut self) -> Option<Result<TransportMessage, Error>>;

    async fn send_text(&mut self, text: String) -> Result<(), Error>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    type Conn: Connection;

    /// Human-readable endpoint, for logs.
    fn endpoint(&self) -> &str;

    async fn connect(&self) -> Result<Self::Conn, Error>;
}

pub struct WsConnector {
    uri: String,
}

impl WsConnector {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connector for WsConnector {
    type Conn = WsConnection;

    fn endpoint(&self) -> &str {
        &self.uri
    }

    async fn connect(&self) -> Result<WsConnection, Error> {
        let (stream, response) = connect_async(self.uri.as_str()).await?;
        trace!("WebSocket handshake status {}", response.status());
        Ok(WsConnection { stream })
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn recv(&mut self) -> Option<Result<TransportMessage, Error>> {
        let message = match self.stream.next().await? {
            Ok(message) => message,
            Err(e) => return Some(Err(e.into())),
        };
        Some(Ok(match message {
            Message::Text(text) => TransportMessage::Text(text),
            Message::Close(frame) => TransportMessage::Close(frame.map(|f| f.reason.to_string())),
            _ => TransportMessage::Other,
        }))
    }

    async fn send_text(&mut self, text: String) -> Result<(), Error> {
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }
}
