//! Framing and transport error types.

use std::time::Duration;

use thiserror::Error;

use crate::frame::FrameKind;

/// A frame could not be encoded or decoded.
///
/// Every variant except [`FrameError::Io`] describes malformed input and is
/// connection-fatal: the reassembler discards its buffer when it reports one.
/// An incomplete frame is never an error.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Bytes 0 and 1 of the header were not zero.
    #[error("invalid frame header: reserved bytes {0:#04x} {1:#04x}")]
    ReservedBytes(u8, u8),

    /// Byte 2 of the header is not a known message kind.
    #[error("unknown message kind {0:#04x}")]
    UnknownKind(u8),

    /// The route does not fit the one-byte length field.
    #[error("route of {0} bytes exceeds 255")]
    RouteTooLong(usize),

    /// The body does not fit the four-byte length field.
    #[error("body of {0} bytes exceeds u32::MAX")]
    BodyTooLong(usize),

    /// Ping, pong, open and close frames are fixed-size.
    #[error("control frame {0:?} cannot carry a route or body")]
    ControlPayload(FrameKind),

    /// A complete message did not match the length its header declares.
    #[error("frame length mismatch: header declares {expected} bytes, got {actual}")]
    LengthMismatch {
        /// Length computed from the header.
        expected: usize,
        /// Length actually supplied.
        actual: usize,
    },

    /// A complete message was shorter than its fixed header.
    #[error("frame truncated: need at least {needed} bytes, got {actual}")]
    Truncated {
        /// Minimum length for the format.
        needed: usize,
        /// Length actually supplied.
        actual: usize,
    },

    /// The declared frame length exceeds the configured limit.
    #[error("frame of {len} bytes exceeds limit of {limit}")]
    TooLarge {
        /// Declared frame length.
        len: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// Legacy frame carried an unknown format byte.
    #[error("unknown legacy format type {0:#04x}")]
    UnknownFormat(u8),

    /// The kind has no legacy representation.
    #[error("{0:?} frames cannot be expressed in the legacy protocol")]
    UnsupportedInLegacy(FrameKind),

    /// I/O failure surfaced through a `tokio_util` framed stream.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether this error means the peer sent malformed bytes.
    pub fn is_malformed(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}

/// A transport read or write failed.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer or the local side has closed the channel.
    #[error("transport closed")]
    Closed,

    /// No message arrived (or a write did not finish) within the deadline.
    #[error("transport timed out after {0:?}")]
    Timeout(Duration),

    /// Socket-level I/O failure.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket protocol failure reported by the underlying library.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Handshake or connect failure.
    #[error("connect failed: {0}")]
    Connect(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_bytes_display() {
        let err = FrameError::ReservedBytes(0x0d, 0x0a);
        assert_eq!(
            err.to_string(),
            "invalid frame header: reserved bytes 0x0d 0x0a"
        );
    }

    #[test]
    fn unknown_kind_display() {
        assert_eq!(
            FrameError::UnknownKind(0x7f).to_string(),
            "unknown message kind 0x7f"
        );
    }

    #[test]
    fn io_is_not_malformed() {
        let err = FrameError::from(std::io::Error::other("eof"));
        assert!(!err.is_malformed());
        assert!(FrameError::UnknownKind(1).is_malformed());
    }

    #[test]
    fn transport_timeout_display() {
        let err = TransportError::Timeout(Duration::from_secs(3));
        assert_eq!(err.to_string(), "transport timed out after 3s");
    }
}
