//! Streaming reassembly of frames from arbitrary byte chunks.
//!
//! [`FrameCodec`] is a `tokio_util` codec usable with `FramedRead` on a
//! byte stream. [`FrameReader`] wraps it with its own buffer for transports
//! that hand over chunks (WebSocket messages, datagrams).
//!
//! Reassembly after each chunk:
//! 1. fewer than [`HEADER_LEN`] bytes buffered: wait
//! 2. no frame length computed yet: validate the header; an invalid header
//!    is a framing error and the whole buffer is discarded
//! 3. fewer than the computed frame length buffered: wait
//! 4. slice out exactly one frame, forget the computed length, repeat

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use crate::error::FrameError;
use crate::frame::{Frame, HEADER_LEN, Header};

/// Default upper bound on a single frame (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Stateful frame decoder.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    /// Length of the frame at the head of the buffer, once its header is valid.
    pending: Option<usize>,
    max_frame_len: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameCodec {
    /// Codec rejecting frames longer than `max_frame_len`.
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            pending: None,
            max_frame_len,
        }
    }

    /// Forget any partially computed frame.
    pub fn reset(&mut self) {
        self.pending = None;
    }

    fn frame_len(&mut self, src: &BytesMut) -> Result<Option<usize>, FrameError> {
        if let Some(len) = self.pending {
            return Ok(Some(len));
        }
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let len = Header::parse(&src[..HEADER_LEN])?.frame_len();
        if len > self.max_frame_len {
            return Err(FrameError::TooLarge {
                len,
                limit: self.max_frame_len,
            });
        }
        self.pending = Some(len);
        Ok(Some(len))
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        let len = match self.frame_len(src) {
            Ok(Some(len)) => len,
            Ok(None) => return Ok(None),
            Err(e) => {
                src.clear();
                self.pending = None;
                return Err(e);
            }
        };
        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }
        self.pending = None;
        let bytes = src.split_to(len).freeze();
        Frame::decode(bytes).map(Some)
    }
}

/// Chunk-fed reassembler owning its buffer.
#[derive(Debug, Default)]
pub struct FrameReader {
    buf: BytesMut,
    codec: FrameCodec,
}

impl FrameReader {
    /// Reader rejecting frames longer than `max_frame_len`.
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            codec: FrameCodec::new(max_frame_len),
        }
    }

    /// Append `data` and hand every complete frame to `on_frame`, in order.
    ///
    /// Returns the number of frames delivered. On a framing error the buffer
    /// is already empty when the error is returned; frames completed before
    /// the bad header have been delivered.
    pub fn feed(
        &mut self,
        data: &[u8],
        mut on_frame: impl FnMut(Frame),
    ) -> Result<usize, FrameError> {
        self.buf.extend_from_slice(data);
        let mut delivered = 0;
        while let Some(frame) = self.codec.decode(&mut self.buf)? {
            on_frame(frame);
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Collect every complete frame from `data`.
    pub fn feed_collect(&mut self, data: &[u8]) -> Result<Vec<Frame>, FrameError> {
        let mut frames = Vec::new();
        let _ = self.feed(data, |f| frames.push(f))?;
        Ok(frames)
    }

    /// Bytes buffered toward the next frame.
    pub fn buffered(&self) -> usize {
        self.buf.remaining()
    }

    /// Drop buffered bytes.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.codec.reset();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
