//! One live connection: its id, its exclusively owned write half and its
//! activity clock.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use skein_core::{BoxSink, Codec, FormatType, ProtocolVersion, WireMessage};

use crate::errors::PushError;

/// Connection identifier. Never 0 for a live connection.
pub type ConnectionId = u32;

/// A registered connection.
///
/// Writes go through an async mutex so at most one writer touches the
/// transport at a time and each push observes its own write result.
pub struct Connection {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    connected_at: Instant,
    sink: tokio::sync::Mutex<BoxSink>,
    codec: Mutex<Codec>,
    last_activity: Mutex<Instant>,
    closing: AtomicBool,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, sink: BoxSink, peer: Option<SocketAddr>, codec: Codec) -> Self {
        let now = Instant::now();
        Self {
            id,
            peer,
            connected_at: now,
            sink: tokio::sync::Mutex::new(sink),
            codec: Mutex::new(codec),
            last_activity: Mutex::new(now),
            closing: AtomicBool::new(false),
        }
    }

    /// Connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address, when the transport has one.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Time since the connection was registered.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Time since the last inbound activity.
    pub fn idle(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Codec for outbound messages on this connection.
    pub fn codec(&self) -> Codec {
        *self.codec.lock()
    }

    /// Switch outbound encoding once the peer has shown which protocol it
    /// speaks.
    pub(crate) fn negotiate(&self, version: ProtocolVersion, format: FormatType) {
        let mut codec = self.codec.lock();
        if codec.version != version {
            tracing::debug!(conn_id = self.id, ?version, "peer protocol negotiated");
        }
        codec.version = version;
        codec.legacy_format = format;
    }

    /// Whether the server has started closing this connection.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    /// Write one message, waiting for the transport to accept it.
    pub async fn write(&self, message: WireMessage, timeout: Duration) -> Result<(), PushError> {
        let id = self.id;
        let write = async {
            let mut sink = self.sink.lock().await;
            sink.send(message).await
        };
        match tokio::time::timeout(timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(PushError::Transport { id, source }),
            Err(_) => Err(PushError::Timeout { id, after: timeout }),
        }
    }

    /// Close the write half. The read loop notices and unregisters the
    /// connection.
    pub async fn close(&self) {
        self.closing.store(true, Ordering::Release);
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            tracing::debug!(conn_id = self.id, error = %e, "close on write half failed");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closing", &self.is_closing())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
