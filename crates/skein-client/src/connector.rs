//! Dialing: the [`Connector`] seam and its tokio-tungstenite implementation.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use skein_core::transport::memory;
use skein_core::{BoxSink, BoxSource, MessageSink, MessageSource, TransportError, WireMessage};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

/// Opens one transport to the server per call.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Dial `url` and return the split transport.
    async fn connect(&self, url: &str) -> Result<(BoxSink, BoxSource), TransportError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of a tungstenite socket.
pub struct TungsteniteSink(SplitSink<WsStream, Message>);

/// Read half of a tungstenite socket.
pub struct TungsteniteSource(SplitStream<WsStream>);

fn to_tungstenite(message: WireMessage) -> Message {
    match message {
        WireMessage::Text(text) => Message::Text(text.into()),
        WireMessage::Binary(bytes) => Message::Binary(bytes),
        WireMessage::Ping(bytes) => Message::Ping(bytes),
        WireMessage::Pong(bytes) => Message::Pong(bytes),
        WireMessage::Close => Message::Close(None),
    }
}

fn from_tungstenite(message: Message) -> Option<WireMessage> {
    match message {
        Message::Text(text) => Some(WireMessage::Text(text.as_str().to_owned())),
        Message::Binary(bytes) => Some(WireMessage::Binary(bytes)),
        Message::Ping(bytes) => Some(WireMessage::Ping(bytes)),
        Message::Pong(bytes) => Some(WireMessage::Pong(bytes)),
        Message::Close(_) => Some(WireMessage::Close),
        Message::Frame(_) => None,
    }
}

#[async_trait]
impl MessageSink for TungsteniteSink {
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
        self.0
            .send(to_tungstenite(message))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.0
            .close()
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }
}

#[async_trait]
impl MessageSource for TungsteniteSource {
    async fn recv(&mut self) -> Option<Result<WireMessage, TransportError>> {
        loop {
            match self.0.next().await? {
                Ok(message) => {
                    if let Some(message) = from_tungstenite(message) {
                        return Some(Ok(message));
                    }
                }
                Err(e) => return Some(Err(TransportError::WebSocket(e.to_string()))),
            }
        }
    }
}

/// WebSocket connector with a handshake deadline.
#[derive(Clone, Debug)]
pub struct WsConnector {
    handshake_timeout: Duration,
}

impl WsConnector {
    /// Connector giving up on the TCP connect + upgrade after `handshake_timeout`.
    pub fn new(handshake_timeout: Duration) -> Self {
        Self { handshake_timeout }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<(BoxSink, BoxSource), TransportError> {
        let dial = tokio_tungstenite::connect_async(url);
        let (stream, response) = tokio::time::timeout(self.handshake_timeout, dial)
            .await
            .map_err(|_| TransportError::Timeout(self.handshake_timeout))?
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        debug!(url, status = %response.status(), "websocket handshake complete");
        let (sink, source) = stream.split();
        Ok((
            Box::new(TungsteniteSink(sink)),
            Box::new(TungsteniteSource(source)),
        ))
    }
}

/// In-process connector: every dial creates a memory pair and hands the far
/// end to whoever holds the receiver.
pub struct MemoryConnector {
    accept: mpsc::UnboundedSender<memory::Endpoint>,
    capacity: usize,
}

impl MemoryConnector {
    /// Connector plus the receiver of the server-side endpoints.
    pub fn new(capacity: usize) -> (Self, mpsc::UnboundedReceiver<memory::Endpoint>) {
        let (accept, rx) = mpsc::unbounded_channel();
        (Self { accept, capacity }, rx)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _url: &str) -> Result<(BoxSink, BoxSource), TransportError> {
        let (local, remote) = memory::pair(self.capacity);
        self.accept
            .send(remote)
            .map_err(|_| TransportError::Connect("memory listener gone".into()))?;
        Ok(local.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use bytes::Bytes;

    #[test]
    fn message_mapping() {
        let cases = [
            WireMessage::Text("t".into()),
            WireMessage::Binary(Bytes::from_static(b"b")),
            WireMessage::Ping(Bytes::new()),
            WireMessage::Pong(Bytes::new()),
            WireMessage::Close,
        ];
        for case in cases {
            assert_eq!(from_tungstenite(to_tungstenite(case.clone())), Some(case));
        }
    }

    #[tokio::test]
    async fn memory_connector_links_both_ends() {
        let (connector, mut accepted) = MemoryConnector::new(4);
        let (mut sink, _source) = connector.connect("ws://mem").await.unwrap();
        let mut remote = accepted.recv().await.unwrap();
        sink.send(WireMessage::Close).await.unwrap();
        assert_eq!(remote.source.recv().await.unwrap().unwrap(), WireMessage::Close);
    }

    #[tokio::test]
    async fn memory_connector_fails_without_listener() {
        let (connector, accepted) = MemoryConnector::new(4);
        drop(accepted);
        assert_matches!(
            connector.connect("ws://mem").await.err(),
            Some(TransportError::Connect(_))
        );
    }

    #[tokio::test]
    async fn ws_connector_reports_refused() {
        let connector = WsConnector::new(Duration::from_secs(2));
        assert!(connector.connect("ws://127.0.0.1:1/ws").await.is_err());
    }
}
