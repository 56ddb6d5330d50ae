//! # skein-settings
//!
//! Configuration for skein servers and clients, loaded from three layers (in
//! priority order):
//! 1. **Compiled defaults** ([`SkeinSettings::default()`])
//! 2. **User file** `~/.skein/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** `SKEIN_*` overrides (highest priority)
//!
//! The loaded value is passed explicitly to whoever builds the server or
//! client.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{ClientSettings, LoggingSettings, ServerSettings, SkeinSettings};

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_work() {
        let _settings = SkeinSettings::default();
        let _path = settings_path();
        let merged = deep_merge(serde_json::json!({"x": 1}), serde_json::json!({"y": 2}));
        assert_eq!(merged["x"], 1);
        assert_eq!(merged["y"], 2);
    }
}
