//! The binary frame and its stateless codec.
//!
//! Layout (big-endian):
//!
//! ```text
//! 0-1   reserved, always 0x00 0x00
//! 2     message kind
//! 3     route length (0-255)
//! 4-7   body length (u32)
//! 8-15  correlation id (i64, 0 = no reply expected)
//! 16..  route bytes, then body bytes
//! ```
//!
//! Ping, pong, open and close frames are exactly [`HEADER_LEN`] bytes.

use std::borrow::Cow;

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::ProtocolVersion;
use crate::error::FrameError;
use crate::legacy::FormatType;

/// Length of the fixed frame header.
pub const HEADER_LEN: usize = 16;

/// Message kind carried in byte 2 of the header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// Not a valid wire kind; returned for unrecognised bytes.
    Unknown = 0x00,
    /// Event frame with a route and a body.
    Data = 0x02,
    /// Datagram peer announces itself.
    Open = 0x03,
    /// Peer is going away.
    Close = 0x04,
    /// Liveness check.
    Ping = 0x09,
    /// Liveness answer.
    Pong = 0x0a,
}

impl FrameKind {
    /// Map a header byte to a kind, [`FrameKind::Unknown`] if unrecognised.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x02 => Self::Data,
            0x03 => Self::Open,
            0x04 => Self::Close,
            0x09 => Self::Ping,
            0x0a => Self::Pong,
            _ => Self::Unknown,
        }
    }

    /// Wire byte for this kind.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Ping, pong, open and close.
    pub fn is_control(self) -> bool {
        matches!(self, Self::Ping | Self::Pong | Self::Open | Self::Close)
    }
}

/// Parsed fixed header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    /// Message kind.
    pub kind: FrameKind,
    /// Route length.
    pub route_len: u8,
    /// Body length.
    pub body_len: u32,
    /// Correlation id.
    pub id: i64,
}

impl Header {
    /// Validate and parse the first [`HEADER_LEN`] bytes of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_LEN {
            return Err(FrameError::Truncated {
                needed: HEADER_LEN,
                actual: bytes.len(),
            });
        }
        if bytes[0] != 0 || bytes[1] != 0 {
            return Err(FrameError::ReservedBytes(bytes[0], bytes[1]));
        }
        let kind = FrameKind::from_byte(bytes[2]);
        if kind == FrameKind::Unknown {
            return Err(FrameError::UnknownKind(bytes[2]));
        }
        let mut body_len = [0u8; 4];
        body_len.copy_from_slice(&bytes[4..8]);
        let mut id = [0u8; 8];
        id.copy_from_slice(&bytes[8..HEADER_LEN]);
        Ok(Self {
            kind,
            route_len: bytes[3],
            body_len: u32::from_be_bytes(body_len),
            id: i64::from_be_bytes(id),
        })
    }

    /// Total frame length this header declares.
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + usize::from(self.route_len) + self.body_len as usize
    }
}

/// One complete protocol message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Wire format the frame was read from or will be written in.
    pub version: ProtocolVersion,
    /// Message kind.
    pub kind: FrameKind,
    /// Correlation id; 0 means no reply expected.
    pub id: i64,
    /// Event name bytes.
    pub route: Bytes,
    /// Opaque payload.
    pub body: Bytes,
    /// Payload format hint; only carried on the wire by legacy frames.
    pub format: FormatType,
}

impl Frame {
    /// Build a current-version data frame.
    pub fn data(id: i64, route: impl Into<Bytes>, body: impl Into<Bytes>) -> Self {
        Self {
            version: ProtocolVersion::Current,
            kind: FrameKind::Data,
            id,
            route: route.into(),
            body: body.into(),
            format: FormatType::Binary,
        }
    }

    /// Build a current-version control frame.
    pub fn control(kind: FrameKind) -> Self {
        Self {
            version: ProtocolVersion::Current,
            kind,
            id: 0,
            route: Bytes::new(),
            body: Bytes::new(),
            format: FormatType::Binary,
        }
    }

    /// Event name, lossily decoded as UTF-8.
    pub fn event(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.route)
    }

    /// Encode in the current wire format.
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        encode(self.kind, self.id, &self.route, &self.body)
    }

    /// Decode one complete current-version frame.
    ///
    /// `bytes` must hold exactly one frame; route and body are zero-copy
    /// slices of it.
    pub fn decode(bytes: Bytes) -> Result<Self, FrameError> {
        let header = Header::parse(&bytes)?;
        let expected = header.frame_len();
        if expected != bytes.len() {
            return Err(FrameError::LengthMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        let route_end = HEADER_LEN + usize::from(header.route_len);
        Ok(Self {
            version: ProtocolVersion::Current,
            kind: header.kind,
            id: header.id,
            route: bytes.slice(HEADER_LEN..route_end),
            body: bytes.slice(route_end..),
            format: FormatType::Binary,
        })
    }
}

/// Encode a frame in the current wire format.
///
/// Control kinds must have an empty route and body.
pub fn encode(kind: FrameKind, id: i64, route: &[u8], body: &[u8]) -> Result<Bytes, FrameError> {
    if kind == FrameKind::Unknown {
        return Err(FrameError::UnknownKind(kind.as_byte()));
    }
    if kind.is_control() && (!route.is_empty() || !body.is_empty()) {
        return Err(FrameError::ControlPayload(kind));
    }
    let route_len = u8::try_from(route.len()).map_err(|_| FrameError::RouteTooLong(route.len()))?;
    let body_len = u32::try_from(body.len()).map_err(|_| FrameError::BodyTooLong(body.len()))?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + route.len() + body.len());
    buf.put_u8(0);
    buf.put_u8(0);
    buf.put_u8(kind.as_byte());
    buf.put_u8(route_len);
    buf.put_u32(body_len);
    buf.put_i64(id);
    buf.put_slice(route);
    buf.put_slice(body);
    Ok(buf.freeze())
}

/// Decode one complete current-version frame from a borrowed slice.
pub fn decode(bytes: &[u8]) -> Result<Frame, FrameError> {
    Frame::decode(Bytes::copy_from_slice(bytes))
}

/// Encode a fixed-size control frame.
pub fn control(kind: FrameKind) -> Result<Bytes, FrameError> {
    if !kind.is_control() {
        return Err(FrameError::UnknownKind(kind.as_byte()));
    }
    encode(kind, 0, &[], &[])
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    #[test]
    fn data_frame_layout() {
        let bytes = encode(FrameKind::Data, 7, b"chat", b"hi").unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 4 + 2);
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x02, 0x04]);
        assert_eq!(&bytes[4..8], &[0, 0, 0, 2]);
        assert_eq!(&bytes[8..16], &[0, 0, 0, 0, 0, 0, 0, 7]);
        assert_eq!(&bytes[16..20], b"chat");
        assert_eq!(&bytes[20..], b"hi");
    }

    #[test]
    fn ping_is_fixed_sixteen_bytes() {
        let bytes = control(FrameKind::Ping).unwrap();
        assert_eq!(
            bytes.as_ref(),
            &[0, 0, 0x09, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn control_rejects_data_kind() {
        assert_matches!(control(FrameKind::Data), Err(FrameError::UnknownKind(0x02)));
    }

    #[test]
    fn control_with_payload_rejected() {
        let err = encode(FrameKind::Pong, 0, b"x", b"").unwrap_err();
        assert_matches!(err, FrameError::ControlPayload(FrameKind::Pong));
    }

    #[test]
    fn route_too_long_rejected() {
        let route = vec![b'a'; 256];
        assert_matches!(
            encode(FrameKind::Data, 0, &route, b""),
            Err(FrameError::RouteTooLong(256))
        );
    }

    #[test]
    fn max_route_accepted() {
        let route = vec![b'a'; 255];
        let frame = decode(&encode(FrameKind::Data, 0, &route, b"").unwrap()).unwrap();
        assert_eq!(frame.route.len(), 255);
    }

    #[test]
    fn negative_correlation_id_survives() {
        let frame = decode(&encode(FrameKind::Data, -42, b"r", b"").unwrap()).unwrap();
        assert_eq!(frame.id, -42);
    }

    #[test]
    fn decode_rejects_reserved_bytes() {
        let mut bytes = encode(FrameKind::Data, 1, b"a", b"b").unwrap().to_vec();
        bytes[1] = 1;
        assert_matches!(decode(&bytes), Err(FrameError::ReservedBytes(0, 1)));
    }

    #[test]
    fn decode_rejects_unknown_kind() {
        let mut bytes = control(FrameKind::Ping).unwrap().to_vec();
        bytes[2] = 0x55;
        assert_matches!(decode(&bytes), Err(FrameError::UnknownKind(0x55)));
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut bytes = encode(FrameKind::Data, 1, b"a", b"b").unwrap().to_vec();
        bytes.push(0);
        assert_matches!(
            decode(&bytes),
            Err(FrameError::LengthMismatch {
                expected: 18,
                actual: 19
            })
        );
    }

    #[test]
    fn decode_rejects_short_input() {
        assert_matches!(
            decode(&[0, 0, 2]),
            Err(FrameError::Truncated {
                needed: HEADER_LEN,
                actual: 3
            })
        );
    }

    #[test]
    fn event_is_lossy_utf8() {
        let frame = Frame::data(0, &b"user.login"[..], Bytes::new());
        assert_eq!(frame.event(), "user.login");
    }

    #[test]
    fn kind_from_byte_roundtrip() {
        for kind in [
            FrameKind::Data,
            FrameKind::Open,
            FrameKind::Close,
            FrameKind::Ping,
            FrameKind::Pong,
        ] {
            assert_eq!(FrameKind::from_byte(kind.as_byte()), kind);
        }
        assert_eq!(FrameKind::from_byte(0x01), FrameKind::Unknown);
    }

    proptest! {
        #[test]
        fn data_roundtrip(
            id in any::<i64>(),
            route in proptest::collection::vec(any::<u8>(), 0..=255),
            body in proptest::collection::vec(any::<u8>(), 0..512),
        ) {
            let bytes = encode(FrameKind::Data, id, &route, &body).unwrap();
            let frame = decode(&bytes).unwrap();
            prop_assert_eq!(frame.kind, FrameKind::Data);
            prop_assert_eq!(frame.id, id);
            prop_assert_eq!(frame.route.as_ref(), route.as_slice());
            prop_assert_eq!(frame.body.as_ref(), body.as_slice());
        }

        #[test]
        fn decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = decode(&bytes);
        }
    }
}
