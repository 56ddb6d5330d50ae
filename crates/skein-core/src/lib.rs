//! # skein-core
//!
//! Foundation of the skein socket runtime.
//!
//! - [`frame`]: the 16-byte-header binary frame and its stateless codec
//! - [`reader`]: streaming reassembly of frames from arbitrary byte chunks
//! - [`legacy`]: the `\r\n`-prefixed plain event+payload format of older peers
//! - [`codec`]: version-aware encoding to transport messages
//! - [`transport`]: message-framed transport traits and an in-memory pair
//! - [`error`]: framing and transport error types
//! - [`logging`]: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod codec;
pub mod error;
pub mod frame;
pub mod legacy;
pub mod logging;
pub mod reader;
pub mod transport;

pub use codec::{Codec, ProtocolVersion};
pub use error::{FrameError, TransportError};
pub use frame::{Frame, FrameKind, HEADER_LEN};
pub use legacy::FormatType;
pub use reader::{FrameCodec, FrameReader};
pub use transport::{BoxSink, BoxSource, MessageSink, MessageSource, WireMessage};
