//! Server error types.
//!
//! Every runtime failure reaches the application through exactly one
//! channel: [`PushError`] is returned to whoever pushed, [`ServerError`] goes
//! to the `on_error` callback, and the reason a connection ended goes to
//! `on_close` as a [`CloseReason`].

use std::fmt;
use std::time::Duration;

use skein_core::{FrameError, TransportError};
use skein_router::{DispatchError, HandlerError};
use thiserror::Error;

use crate::connection::ConnectionId;

/// The connection id space is full.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Every id between 1 and the configured maximum is live.
    #[error("connections overflow: all {0} ids in use")]
    Exhausted(u32),
}

/// A push could not be delivered.
#[derive(Debug, Error)]
pub enum PushError {
    /// No open connection has this id.
    #[error("connection {0} not found")]
    NotFound(ConnectionId),

    /// The message could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[from] FrameError),

    /// A JSON body could not be serialized.
    #[error("json body: {0}")]
    Json(#[from] serde_json::Error),

    /// The socket write failed.
    #[error("write to connection {id} failed: {source}")]
    Transport {
        /// Destination.
        id: ConnectionId,
        /// Transport error.
        #[source]
        source: TransportError,
    },

    /// The socket write did not finish in time.
    #[error("write to connection {id} timed out after {after:?}")]
    Timeout {
        /// Destination.
        id: ConnectionId,
        /// Configured write timeout.
        after: Duration,
    },
}

impl From<PushError> for HandlerError {
    fn from(err: PushError) -> Self {
        HandlerError::failed(err)
    }
}

/// The server could not be built.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A callback the server cannot run without was not provided.
    #[error("missing required callback: {0}")]
    MissingCallback(&'static str),

    /// A configuration value is out of range.
    #[error("invalid server config: {0}")]
    Invalid(String),
}

/// Runtime failures reported through `on_error`.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Malformed bytes; the connection is closed.
    #[error("connection {id}: framing error: {source}")]
    Framing {
        /// Connection that sent the bytes.
        id: ConnectionId,
        /// Decoder error.
        #[source]
        source: FrameError,
    },

    /// Route not found or chain stopped; the connection stays open.
    #[error("connection {id}: {source}")]
    Dispatch {
        /// Connection the frame arrived on.
        id: ConnectionId,
        /// Router error.
        #[source]
        source: DispatchError,
    },

    /// A datagram from an unregistered peer could not be decoded.
    #[error("datagram from {peer}: {source}")]
    Datagram {
        /// Sender address.
        peer: std::net::SocketAddr,
        /// Decoder error.
        #[source]
        source: FrameError,
    },

    /// A read failed; the connection is closed.
    #[error("connection {id}: read failed: {source}")]
    Transport {
        /// Connection that failed.
        id: ConnectionId,
        /// Transport error.
        #[source]
        source: TransportError,
    },

    /// A reply written by the runtime itself (pong, open ack) failed.
    #[error(transparent)]
    Push(#[from] PushError),

    /// No id was available for a new connection; the connection is refused.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Binding or serving the listener failed.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server could not be built.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Why a connection ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the transport or sent a close frame.
    PeerClosed,
    /// A read failed.
    ReadFailure,
    /// Nothing arrived within the heartbeat timeout.
    IdleTimeout,
    /// The peer sent malformed bytes.
    Protocol,
    /// The server closed the connection (shutdown or explicit close).
    Server,
}

impl CloseReason {
    /// Metric label.
    pub fn label(self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::ReadFailure => "read_failure",
            Self::IdleTimeout => "idle_timeout",
            Self::Protocol => "protocol",
            Self::Server => "server",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PeerClosed => "peer closed",
            Self::ReadFailure => "read failure",
            Self::IdleTimeout => "idle timeout",
            Self::Protocol => "protocol error",
            Self::Server => "closed by server",
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        assert_eq!(PushError::NotFound(7).to_string(), "connection 7 not found");
    }

    #[test]
    fn exhausted_display() {
        assert_eq!(
            RegistryError::Exhausted(3).to_string(),
            "connections overflow: all 3 ids in use"
        );
    }

    #[test]
    fn push_error_becomes_handler_error() {
        let err: HandlerError = PushError::NotFound(1).into();
        assert!(matches!(err, HandlerError::Failed(_)));
    }

    #[test]
    fn close_reason_display() {
        assert_eq!(CloseReason::IdleTimeout.to_string(), "idle timeout");
    }
}
