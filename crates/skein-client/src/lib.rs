//! # skein-client
//!
//! Client side of the skein socket runtime: one session to one server,
//! kept alive with a heartbeat and re-dialed after it drops.
//!
//! - [`client`]: the [`Client`] handle, its builder and the session loop
//! - [`connector`]: how a transport is dialed
//! - [`heartbeat`]: the liveness check and its loop
//! - [`pending`]: reply waits for [`Client::async_emit`]

#![deny(unsafe_code)]

pub mod client;
pub mod config;
pub mod connector;
pub mod errors;
pub mod heartbeat;
pub mod pending;

pub use client::{Client, ClientBuilder, ClientContext, Status};
pub use config::ClientConfig;
pub use connector::{Connector, MemoryConnector, WsConnector};
pub use errors::{ClientError, ConfigError, DisconnectReason};
pub use heartbeat::{Heartbeat, PingHeartbeat};
