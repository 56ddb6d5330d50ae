//! Server configuration.

use std::time::Duration;

use skein_core::reader::DEFAULT_MAX_FRAME_LEN;
use skein_core::{Codec, ProtocolVersion};
use skein_router::DispatchMode;
use skein_settings::ServerSettings;

use crate::errors::ConfigError;
use crate::registry::DEFAULT_WRITE_TIMEOUT;

/// Configuration for a skein server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// WebSocket port (default `0` for auto-assign).
    pub port: u16,
    /// Upgrade path.
    pub path: String,
    /// Datagram port; no UDP listener when `None`.
    pub udp_port: Option<u16>,
    /// Expected client ping interval; also the datagram sweep period.
    pub heartbeat_interval: Duration,
    /// Read deadline per connection.
    pub heartbeat_timeout: Duration,
    /// Upper bound on a single push.
    pub write_timeout: Duration,
    /// Largest accepted frame.
    pub max_frame_len: usize,
    /// Dispatch ordering per connection.
    pub dispatch: DispatchMode,
    /// Outbound codec until a peer shows it speaks the other version.
    pub codec: Codec,
    /// Grace period for tasks on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            path: "/ws".into(),
            udp_port: None,
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(30),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            dispatch: DispatchMode::Concurrent,
            codec: Codec::current(),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// `host:port` for the WebSocket listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "path must start with '/': {}",
                self.path
            )));
        }
        if self.heartbeat_interval.is_zero() || self.heartbeat_timeout.is_zero() {
            return Err(ConfigError::Invalid("heartbeat durations must be non-zero".into()));
        }
        if self.heartbeat_timeout < self.heartbeat_interval {
            return Err(ConfigError::Invalid(
                "heartbeat timeout must not be below the interval".into(),
            ));
        }
        if self.write_timeout.is_zero() {
            return Err(ConfigError::Invalid("write timeout must be non-zero".into()));
        }
        if self.max_frame_len < skein_core::HEADER_LEN {
            return Err(ConfigError::Invalid(format!(
                "max frame length {} is below the header length",
                self.max_frame_len
            )));
        }
        Ok(())
    }
}

impl From<&ServerSettings> for ServerConfig {
    fn from(s: &ServerSettings) -> Self {
        let codec = match s.version {
            ProtocolVersion::Current => Codec::current(),
            ProtocolVersion::Legacy => Codec::legacy(s.legacy_format),
        };
        Self {
            host: s.host.clone(),
            port: s.port,
            path: s.path.clone(),
            udp_port: s.udp_port,
            heartbeat_interval: s.heartbeat_interval(),
            heartbeat_timeout: s.heartbeat_timeout(),
            write_timeout: s.write_timeout(),
            max_frame_len: s.max_frame_len,
            dispatch: DispatchMode::from_sequential(s.sequential_dispatch),
            codec,
            ..Self::default()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
