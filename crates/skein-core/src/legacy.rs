//! Legacy plain event+payload format spoken by older peers.
//!
//! ```text
//! 0-1   b"\r\n"
//! 2     route length
//! 3     format type (text / json / binary)
//! 4..   route bytes, then body bytes
//! ```
//!
//! Legacy frames carry no correlation id and no length for the body; they
//! rely on the transport to delimit messages.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::codec::ProtocolVersion;
use crate::error::FrameError;
use crate::frame::{Frame, FrameKind};

/// Leading bytes of every legacy frame.
pub const LEGACY_PREFIX: [u8; 2] = [b'\r', b'\n'];

/// Fixed part of a legacy frame.
pub const LEGACY_HEADER_LEN: usize = 4;

/// Root event used when a legacy route is empty.
pub const ROOT_EVENT: &str = "/";

/// Payload format hint carried in byte 3 of a legacy frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum FormatType {
    /// Plain text.
    Text = 0,
    /// JSON document.
    Json = 1,
    /// Opaque binary (protobuf and friends).
    #[default]
    Binary = 2,
}

impl FormatType {
    /// Parse the wire byte.
    pub fn from_byte(byte: u8) -> Result<Self, FrameError> {
        match byte {
            0 => Ok(Self::Text),
            1 => Ok(Self::Json),
            2 => Ok(Self::Binary),
            other => Err(FrameError::UnknownFormat(other)),
        }
    }
}

/// Whether `bytes` starts with the legacy prefix.
pub fn is_legacy(bytes: &[u8]) -> bool {
    bytes.len() >= LEGACY_PREFIX.len() && bytes[..LEGACY_PREFIX.len()] == LEGACY_PREFIX
}

/// Encode a legacy data frame. An empty route is sent as [`ROOT_EVENT`].
pub fn encode(route: &[u8], body: &[u8], format: FormatType) -> Result<Bytes, FrameError> {
    let route = if route.is_empty() {
        ROOT_EVENT.as_bytes()
    } else {
        route
    };
    let route_len = u8::try_from(route.len()).map_err(|_| FrameError::RouteTooLong(route.len()))?;

    let mut buf = BytesMut::with_capacity(LEGACY_HEADER_LEN + route.len() + body.len());
    buf.put_slice(&LEGACY_PREFIX);
    buf.put_u8(route_len);
    buf.put_u8(format as u8);
    buf.put_slice(route);
    buf.put_slice(body);
    Ok(buf.freeze())
}

/// Decode one complete legacy frame.
///
/// A zero route length addresses [`ROOT_EVENT`] and everything after the
/// fixed part is the body.
pub fn decode(bytes: Bytes) -> Result<Frame, FrameError> {
    if bytes.len() < LEGACY_HEADER_LEN {
        return Err(FrameError::Truncated {
            needed: LEGACY_HEADER_LEN,
            actual: bytes.len(),
        });
    }
    if !is_legacy(&bytes) {
        return Err(FrameError::ReservedBytes(bytes[0], bytes[1]));
    }
    let format = FormatType::from_byte(bytes[3])?;
    let route_len = usize::from(bytes[2]);
    let route_end = LEGACY_HEADER_LEN + route_len;
    if bytes.len() < route_end {
        return Err(FrameError::Truncated {
            needed: route_end,
            actual: bytes.len(),
        });
    }
    let route = if route_len == 0 {
        Bytes::from_static(ROOT_EVENT.as_bytes())
    } else {
        bytes.slice(LEGACY_HEADER_LEN..route_end)
    };
    Ok(Frame {
        version: ProtocolVersion::Legacy,
        kind: FrameKind::Data,
        id: 0,
        route,
        body: bytes.slice(route_end..),
        format,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
