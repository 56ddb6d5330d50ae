//! Client configuration.

use std::time::Duration;

use skein_core::reader::DEFAULT_MAX_FRAME_LEN;
use skein_core::{Codec, ProtocolVersion};
use skein_router::DispatchMode;
use skein_settings::ClientSettings;

use crate::errors::ConfigError;

/// Configuration for a skein client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Server URL.
    pub url: String,
    /// Dial again after a session ends.
    pub reconnect: bool,
    /// Pause between a disconnect and the next dial.
    pub reconnect_interval: Duration,
    /// Ping period.
    pub heartbeat_interval: Duration,
    /// Read deadline; also bounds each write.
    pub heartbeat_timeout: Duration,
    /// Connect + upgrade deadline.
    pub handshake_timeout: Duration,
    /// Largest accepted frame.
    pub max_frame_len: usize,
    /// Outbound protocol.
    pub codec: Codec,
    /// Dispatch ordering for inbound events.
    pub dispatch: DispatchMode,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".into(),
            reconnect: true,
            reconnect_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(15),
            heartbeat_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(2),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            codec: Codec::current(),
            dispatch: DispatchMode::Concurrent,
        }
    }
}

impl ClientConfig {
    /// Config for `url` with every other value defaulted.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Check values the client cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(ConfigError::Invalid(format!(
                "url must be ws:// or wss://: {}",
                self.url
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
        Ok(())
    }
}

impl From<&ClientSettings> for ClientConfig {
    fn from(s: &ClientSettings) -> Self {
        let codec = match s.version {
            ProtocolVersion::Current => Codec::current(),
            ProtocolVersion::Legacy => Codec::legacy(s.legacy_format),
        };
        Self {
            url: s.url.clone(),
            reconnect: s.reconnect,
            reconnect_interval: Duration::from_millis(s.reconnect_interval_ms),
            heartbeat_interval: Duration::from_millis(s.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(s.heartbeat_timeout_ms),
            handshake_timeout: Duration::from_millis(s.handshake_timeout_ms),
            codec,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use skein_core::FormatType;

    #[test]
    fn defaults_are_valid() {
        assert!(ClientConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_http_url() {
        assert_matches!(
            ClientConfig::new("http://localhost").validate(),
            Err(ConfigError::Invalid(_))
        );
    }

    #[test]
    fn from_settings() {
        let settings = ClientSettings {
            reconnect: false,
            reconnect_interval_ms: 250,
            version: ProtocolVersion::Legacy,
            ..ClientSettings::default()
        };
        let cfg = ClientConfig::from(&settings);
        assert!(!cfg.reconnect);
        assert_eq!(cfg.reconnect_interval, Duration::from_millis(250));
        assert!(cfg.codec.is_legacy());
    }

    #[test]
    fn legacy_format_comes_from_settings() {
        let settings = ClientSettings {
            version: ProtocolVersion::Legacy,
            legacy_format: FormatType::Json,
            ..ClientSettings::default()
        };
        assert_eq!(ClientConfig::from(&settings).codec, Codec::legacy(FormatType::Json));
        assert_eq!(
            ClientConfig::from(&ClientSettings::default()).codec,
            Codec::current()
        );
    }
}
