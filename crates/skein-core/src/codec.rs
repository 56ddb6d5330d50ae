//! Version-aware encoding between frames and transport messages.
//!
//! A [`Codec`] carries the negotiated [`ProtocolVersion`]. Outbound data is
//! written in that version; inbound messages are auto-detected so a peer that
//! still speaks the legacy format is understood either way.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::FrameError;
use crate::frame::{self, Frame, FrameKind};
use crate::legacy::{self, FormatType};
use crate::transport::WireMessage;

/// Wire protocol generation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolVersion {
    /// `\r\n`-prefixed event+payload messages.
    Legacy,
    /// 16-byte-header binary frames.
    #[default]
    Current,
}

/// Encoder/decoder bound to one protocol version.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Codec {
    /// Version used for outbound messages.
    pub version: ProtocolVersion,
    /// Format byte stamped on outbound legacy frames.
    pub legacy_format: FormatType,
}

impl Codec {
    /// Codec for the current binary protocol.
    pub fn current() -> Self {
        Self::default()
    }

    /// Codec for the legacy protocol with the given payload format.
    pub fn legacy(format: FormatType) -> Self {
        Self {
            version: ProtocolVersion::Legacy,
            legacy_format: format,
        }
    }

    /// Whether this codec writes legacy frames.
    pub fn is_legacy(&self) -> bool {
        self.version == ProtocolVersion::Legacy
    }

    /// Encode one message.
    ///
    /// In legacy mode liveness and close travel as native transport
    /// messages because the legacy format has no control frames, and
    /// correlation ids are dropped.
    pub fn encode(
        &self,
        kind: FrameKind,
        id: i64,
        route: &[u8],
        body: &[u8],
    ) -> Result<WireMessage, FrameError> {
        match self.version {
            ProtocolVersion::Current => Ok(WireMessage::Binary(frame::encode(kind, id, route, body)?)),
            ProtocolVersion::Legacy => match kind {
                FrameKind::Data => Ok(WireMessage::Binary(legacy::encode(
                    route,
                    body,
                    self.legacy_format,
                )?)),
                FrameKind::Ping => Ok(WireMessage::Ping(Bytes::new())),
                FrameKind::Pong => Ok(WireMessage::Pong(Bytes::new())),
                FrameKind::Close => Ok(WireMessage::Close),
                FrameKind::Open | FrameKind::Unknown => Err(FrameError::UnsupportedInLegacy(kind)),
            },
        }
    }

    /// Encode a data frame.
    pub fn data(&self, id: i64, event: &str, body: &[u8]) -> Result<WireMessage, FrameError> {
        self.encode(FrameKind::Data, id, event.as_bytes(), body)
    }

    /// Encode a liveness ping.
    pub fn ping(&self) -> Result<WireMessage, FrameError> {
        self.encode(FrameKind::Ping, 0, &[], &[])
    }

    /// Encode a liveness answer.
    pub fn pong(&self) -> Result<WireMessage, FrameError> {
        self.encode(FrameKind::Pong, 0, &[], &[])
    }

    /// Decode one complete message, detecting the legacy prefix.
    pub fn decode(&self, bytes: Bytes) -> Result<Frame, FrameError> {
        decode(bytes)
    }
}

/// Decode one complete message in whichever version it was written.
pub fn decode(bytes: Bytes) -> Result<Frame, FrameError> {
    if legacy::is_legacy(&bytes) {
        legacy::decode(bytes)
    } else {
        Frame::decode(bytes)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn current_data_is_binary_frame() {
        let msg = Codec::current().data(5, "chat.send", b"hi").unwrap();
        let WireMessage::Binary(bytes) = msg else {
            panic!("expected binary message");
        };
        let frame = Frame::decode(bytes).unwrap();
        assert_eq!(frame.id, 5);
        assert_eq!(frame.event(), "chat.send");
    }

    #[test]
    fn current_ping_is_control_frame() {
        let msg = Codec::current().ping().unwrap();
        assert_eq!(msg, WireMessage::Binary(frame::control(FrameKind::Ping).unwrap()));
    }

    #[test]
    fn legacy_data_uses_legacy_layout() {
        let codec = Codec::legacy(FormatType::Json);
        let WireMessage::Binary(bytes) = codec.data(9, "login", b"{}").unwrap() else {
            panic!("expected binary message");
        };
        assert!(legacy::is_legacy(&bytes));
        let frame = decode(bytes).unwrap();
        assert_eq!(frame.version, ProtocolVersion::Legacy);
        assert_eq!(frame.format, FormatType::Json);
        assert_eq!(frame.id, 0);
    }

    #[test]
    fn legacy_control_maps_to_native_messages() {
        let codec = Codec::legacy(FormatType::Binary);
        assert_matches!(codec.ping(), Ok(WireMessage::Ping(_)));
        assert_matches!(codec.pong(), Ok(WireMessage::Pong(_)));
        assert_matches!(
            codec.encode(FrameKind::Close, 0, &[], &[]),
            Ok(WireMessage::Close)
        );
        assert_matches!(
            codec.encode(FrameKind::Open, 0, &[], &[]),
            Err(FrameError::UnsupportedInLegacy(FrameKind::Open))
        );
    }

    #[test]
    fn decode_detects_either_version() {
        let current = frame::encode(FrameKind::Data, 1, b"a", b"b").unwrap();
        let old = legacy::encode(b"a", b"b", FormatType::Text).unwrap();
        assert_eq!(decode(current).unwrap().version, ProtocolVersion::Current);
        assert_eq!(decode(old).unwrap().version, ProtocolVersion::Legacy);
    }

    #[test]
    fn version_serde_is_lowercase() {
        let json = serde_json::to_string(&ProtocolVersion::Legacy).unwrap();
        assert_eq!(json, r#""legacy""#);
    }
}
