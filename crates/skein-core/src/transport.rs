//! Message-framed transport abstraction.
//!
//! The runtime never touches a socket directly. A transport is split into a
//! [`MessageSink`] (write half, exclusively owned by one connection) and a
//! [`MessageSource`] (read half, driven by that connection's read loop).
//! Adapters for axum and tokio-tungstenite live in the server and client
//! crates; [`memory`] provides an in-process pair for tests.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;

/// One transport-level message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireMessage {
    /// UTF-8 text message.
    Text(String),
    /// Binary message; skein frames travel here.
    Binary(Bytes),
    /// Transport-level ping.
    Ping(Bytes),
    /// Transport-level pong.
    Pong(Bytes),
    /// Close notification.
    Close,
}

impl WireMessage {
    /// Payload bytes for text and binary messages, empty otherwise.
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(bytes) => bytes,
            Self::Ping(_) | Self::Pong(_) | Self::Close => &[],
        }
    }

    /// Short name for logs.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Binary(_) => "binary",
            Self::Ping(_) => "ping",
            Self::Pong(_) => "pong",
            Self::Close => "close",
        }
    }
}

/// Write half of a transport.
#[async_trait]
pub trait MessageSink: Send {
    /// Write one message, returning once it has been handed to the socket.
    async fn send(&mut self, message: WireMessage) -> Result<(), TransportError>;

    /// Close the write half. Closing twice is not an error.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Read half of a transport.
#[async_trait]
pub trait MessageSource: Send {
    /// Next message, `None` on clean end of stream.
    async fn recv(&mut self) -> Option<Result<WireMessage, TransportError>>;
}

/// Boxed write half.
pub type BoxSink = Box<dyn MessageSink>;

/// Boxed read half.
pub type BoxSource = Box<dyn MessageSource>;

/// In-process transport backed by `tokio::sync::mpsc`.
pub mod memory {
    use super::*;
    use tokio::sync::mpsc;

    /// Write half of an in-memory transport.
    pub struct MemorySink {
        tx: Option<mpsc::Sender<WireMessage>>,
    }

    /// Read half of an in-memory transport.
    pub struct MemorySource {
        rx: mpsc::Receiver<WireMessage>,
    }

    /// One side of an in-memory pair.
    pub struct Endpoint {
        /// Messages written here arrive at the other side's source.
        pub sink: MemorySink,
        /// Messages written by the other side arrive here.
        pub source: MemorySource,
    }

    impl Endpoint {
        /// Box both halves for the runtime.
        pub fn boxed(self) -> (BoxSink, BoxSource) {
            (Box::new(self.sink), Box::new(self.source))
        }
    }

    /// Create two connected endpoints, each direction buffering `capacity`
    /// messages.
    pub fn pair(capacity: usize) -> (Endpoint, Endpoint) {
        let (a_tx, b_rx) = mpsc::channel(capacity);
        let (b_tx, a_rx) = mpsc::channel(capacity);
        (
            Endpoint {
                sink: MemorySink { tx: Some(a_tx) },
                source: MemorySource { rx: a_rx },
            },
            Endpoint {
                sink: MemorySink { tx: Some(b_tx) },
                source: MemorySource { rx: b_rx },
            },
        )
    }

    #[async_trait]
    impl MessageSink for MemorySink {
        async fn send(&mut self, message: WireMessage) -> Result<(), TransportError> {
            let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
            tx.send(message).await.map_err(|_| TransportError::Closed)
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            drop(self.tx.take());
            Ok(())
        }
    }

    #[async_trait]
    impl MessageSource for MemorySource {
        async fn recv(&mut self) -> Option<Result<WireMessage, TransportError>> {
            self.rx.recv().await.map(Ok)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::memory::pair;
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn memory_pair_delivers_both_ways() {
        let (mut a, mut b) = pair(4);
        a.sink.send(WireMessage::Text("hi".into())).await.unwrap();
        b.sink
            .send(WireMessage::Binary(Bytes::from_static(b"yo")))
            .await
            .unwrap();
        assert_eq!(
            b.source.recv().await.unwrap().unwrap(),
            WireMessage::Text("hi".into())
        );
        assert_eq!(
            a.source.recv().await.unwrap().unwrap().payload(),
            b"yo"
        );
    }

    #[tokio::test]
    async fn close_ends_peer_stream() {
        let (mut a, mut b) = pair(4);
        a.sink.close().await.unwrap();
        a.sink.close().await.unwrap();
        assert!(b.source.recv().await.is_none());
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (mut a, _b) = pair(4);
        a.sink.close().await.unwrap();
        assert_matches!(
            a.sink.send(WireMessage::Close).await,
            Err(TransportError::Closed)
        );
    }

    #[tokio::test]
    async fn send_to_dropped_peer_fails() {
        let (mut a, b) = pair(4);
        drop(b);
        assert_matches!(
            a.sink.send(WireMessage::Ping(Bytes::new())).await,
            Err(TransportError::Closed)
        );
    }

    #[test]
    fn kind_names() {
        assert_eq!(WireMessage::Close.kind_name(), "close");
        assert_eq!(WireMessage::Ping(Bytes::new()).payload(), b"");
    }
}
