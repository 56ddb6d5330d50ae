//! Client error types.

use std::fmt;
use std::time::Duration;

use skein_core::{FrameError, TransportError};
use skein_router::{DispatchError, HandlerError};
use thiserror::Error;

/// Failures returned to callers or reported through `on_error`.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No session is open; the push was not attempted.
    #[error("client is not connected")]
    NotConnected,

    /// The session closed while a reply was awaited.
    #[error("disconnected while waiting for a reply")]
    Disconnected,

    /// Dialing the server failed.
    #[error("connect failed: {0}")]
    Connect(#[source] TransportError),

    /// A write or read on the open session failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A write did not finish in time.
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),

    /// An outbound message could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[from] FrameError),

    /// The server sent malformed bytes; the session is closed.
    #[error("framing error: {0}")]
    Framing(#[source] FrameError),

    /// A JSON body could not be serialized.
    #[error("json body: {0}")]
    Json(#[from] serde_json::Error),

    /// No reply arrived within the deadline.
    #[error("no reply to {event} within {after:?}")]
    ReplyTimeout {
        /// Event that was sent.
        event: String,
        /// Deadline that expired.
        after: Duration,
    },

    /// A reply to the same event is already awaited (legacy protocol only,
    /// where replies are matched by event name).
    #[error("a reply to {0} is already pending")]
    ReplyPending(String),

    /// An inbound event could not be dispatched.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The heartbeat hook failed.
    #[error("heartbeat failed: {0}")]
    Heartbeat(#[source] Box<ClientError>),
}

impl From<ClientError> for HandlerError {
    fn from(err: ClientError) -> Self {
        HandlerError::failed(err)
    }
}

/// The client could not be built.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A callback the client cannot run without was not provided.
    #[error("missing required callback: {0}")]
    MissingCallback(&'static str),

    /// A configuration value is out of range.
    #[error("invalid client config: {0}")]
    Invalid(String),
}

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server closed the transport or sent a close frame.
    PeerClosed,
    /// A read failed.
    ReadFailure,
    /// Nothing arrived within the heartbeat timeout.
    IdleTimeout,
    /// A heartbeat could not be sent.
    HeartbeatFailed,
    /// The server sent malformed bytes.
    Protocol,
    /// [`crate::Client::close`] was called.
    Closed,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PeerClosed => "peer closed",
            Self::ReadFailure => "read failure",
            Self::IdleTimeout => "idle timeout",
            Self::HeartbeatFailed => "heartbeat failed",
            Self::Protocol => "protocol error",
            Self::Closed => "closed by client",
        })
    }
}
