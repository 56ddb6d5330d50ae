//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why settings could not be loaded.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        /// File that was read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid JSON.
    #[error("{} is not valid JSON: {source}", path.display())]
    Parse {
        /// File that was parsed.
        path: PathBuf,
        /// Parser error with line and column.
        #[source]
        source: serde_json::Error,
    },

    /// The merged document does not fit the settings schema (wrong type for
    /// a known key).
    #[error("settings do not match the schema: {0}")]
    Schema(#[from] serde_json::Error),

    /// A field holds a value the runtime cannot use.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// camelCase path of the field, e.g. `server.path`.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

impl SettingsError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }

    /// The offending field for [`SettingsError::Invalid`].
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Invalid { field, .. } => Some(field),
            Self::Read { .. } | Self::Parse { .. } | Self::Schema(_) => None,
        }
    }
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_names_the_file() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = SettingsError::Parse {
            path: PathBuf::from("/etc/skein/settings.json"),
            source,
        };
        assert!(err.to_string().starts_with("/etc/skein/settings.json is not valid JSON"));
    }

    #[test]
    fn invalid_names_the_field() {
        let err = SettingsError::invalid("server.path", "must start with '/'");
        assert_eq!(err.to_string(), "invalid server.path: must start with '/'");
        assert_eq!(err.field(), Some("server.path"));
    }
}
