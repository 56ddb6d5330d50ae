//! # skein-server
//!
//! Server side of the skein socket runtime.
//!
//! - [`registry`]: connection table, id allocation and synchronous push
//! - [`connection`]: one live connection and its serialized write half
//! - [`session`]: the per-connection read loop and the [`Session`] handle
//!   handlers reply through
//! - [`server`]: axum WebSocket server with `/health` and `/metrics`
//! - [`udp`]: the same frame protocol over datagrams
//! - [`config`], [`errors`], [`health`], [`metrics`], [`shutdown`]

#![deny(unsafe_code)]

pub mod callbacks;
pub mod config;
pub mod connection;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod udp;
pub mod ws;

pub use config::ServerConfig;
pub use connection::{Connection, ConnectionId};
pub use errors::{CloseReason, ConfigError, PushError, RegistryError, ServerError};
pub use registry::ConnectionRegistry;
pub use server::{Server, ServerBuilder, ServerHandle};
pub use session::{ServerContext, Session};
pub use shutdown::{DrainOutcome, ShutdownCoordinator};
