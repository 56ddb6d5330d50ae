//! Settings structures.
//!
//! All durations are stored as milliseconds so the JSON file stays flat.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use skein_core::{FormatType, ProtocolVersion};

use crate::errors::{Result, SettingsError};

/// Root settings document (`~/.skein/settings.json`).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SkeinSettings {
    /// Server-side settings.
    pub server: ServerSettings,
    /// Client-side settings.
    pub client: ClientSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl SkeinSettings {
    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        self.server.validate()?;
        self.client.validate()
    }
}

/// WebSocket and datagram server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// WebSocket (HTTP) port.
    pub port: u16,
    /// Path the WebSocket upgrade is served on.
    pub path: String,
    /// Datagram port; the UDP server is off when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub udp_port: Option<u16>,
    /// Interval at which the client is expected to ping.
    pub heartbeat_interval_ms: u64,
    /// Read deadline; a connection silent this long is closed.
    pub heartbeat_timeout_ms: u64,
    /// Upper bound on a single push.
    pub write_timeout_ms: u64,
    /// Largest accepted frame in bytes.
    pub max_frame_len: usize,
    /// Await each handler in the read loop instead of spawning it.
    pub sequential_dispatch: bool,
    /// Protocol used for outbound frames.
    pub version: ProtocolVersion,
    /// Format byte for outbound legacy frames.
    pub legacy_format: FormatType,
    /// Match event literals case-insensitively.
    pub ignore_case: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            path: "/ws".to_string(),
            udp_port: None,
            heartbeat_interval_ms: 15_000,
            heartbeat_timeout_ms: 30_000,
            write_timeout_ms: 10_000,
            max_frame_len: 16 * 1024 * 1024,
            sequential_dispatch: false,
            version: ProtocolVersion::Current,
            legacy_format: FormatType::Binary,
            ignore_case: false,
        }
    }
}

impl ServerSettings {
    /// `host:port` for the WebSocket listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Heartbeat interval as a [`Duration`].
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Read deadline as a [`Duration`].
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Push timeout as a [`Duration`].
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if !self.path.starts_with('/') {
            return Err(SettingsError::invalid(
                "server.path",
                format!("must start with '/': {}", self.path),
            ));
        }
        if self.heartbeat_timeout_ms < self.heartbeat_interval_ms {
            return Err(SettingsError::invalid(
                "server.heartbeatTimeoutMs",
                "must not be below server.heartbeatIntervalMs",
            ));
        }
        Ok(())
    }
}

/// Client session settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Server URL (`ws://` or `wss://`).
    pub url: String,
    /// Reconnect after the session drops.
    pub reconnect: bool,
    /// Pause before each reconnect attempt.
    pub reconnect_interval_ms: u64,
    /// Ping interval.
    pub heartbeat_interval_ms: u64,
    /// Read deadline.
    pub heartbeat_timeout_ms: u64,
    /// Connect + upgrade deadline.
    pub handshake_timeout_ms: u64,
    /// Protocol used for outbound frames.
    pub version: ProtocolVersion,
    /// Format byte stamped on outbound legacy frames.
    pub legacy_format: FormatType,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            reconnect: true,
            reconnect_interval_ms: 1_000,
            heartbeat_interval_ms: 15_000,
            heartbeat_timeout_ms: 30_000,
            handshake_timeout_ms: 2_000,
            version: ProtocolVersion::Current,
            legacy_format: FormatType::default(),
        }
    }
}

impl ClientSettings {
    fn validate(&self) -> Result<()> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(SettingsError::invalid(
                "client.url",
                format!("must be a ws:// or wss:// URL: {}", self.url),
            ));
        }
        if self.heartbeat_timeout_ms < self.heartbeat_interval_ms {
            return Err(SettingsError::invalid(
                "client.heartbeatTimeoutMs",
                "must not be below client.heartbeatIntervalMs",
            ));
        }
        Ok(())
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of the compact format.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
