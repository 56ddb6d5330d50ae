//! Router error types.

use std::fmt;

use thiserror::Error;

/// A pattern could not be registered or removed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    /// A route is already registered for an equivalent pattern.
    #[error("route already registered: {0}")]
    Duplicate(String),

    /// Two patterns name the parameter at the same position differently.
    #[error("parameter :{new} in {pattern} conflicts with existing :{existing}")]
    ParamConflict {
        /// Pattern being registered.
        pattern: String,
        /// Name already in the trie.
        existing: String,
        /// Name in the new pattern.
        new: String,
    },

    /// A `:` or `*` segment without a name.
    #[error("unnamed parameter in {0}")]
    UnnamedParam(String),

    /// A `*name` segment that is not the last one.
    #[error("catch-all must be the last segment in {0}")]
    CatchAllNotLast(String),
}

/// Failure reported by a handler or interceptor.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// An interceptor declined the call.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The payload could not be decoded.
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// Any other failure.
    #[error(transparent)]
    Failed(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    /// Reject with a message.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    /// Wrap an arbitrary error.
    pub fn failed(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Failed(Box::new(err))
    }
}

/// Where in the chain a call stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// A `before` interceptor.
    Before,
    /// The route handler.
    Handler,
    /// An `after` interceptor.
    After,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Before => "before",
            Self::Handler => "handler",
            Self::After => "after",
        })
    }
}

/// An event could not be dispatched to completion.
///
/// None of these close the connection.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No route matches the event.
    #[error("{0} 404 not found")]
    NotFound(String),

    /// A `before` or `after` interceptor stopped the chain.
    #[error("{event}: {stage} interceptor rejected: {source}")]
    Rejected {
        /// Event being dispatched.
        event: String,
        /// Which interceptor list failed.
        stage: Stage,
        /// Interceptor's error.
        #[source]
        source: HandlerError,
    },

    /// The route handler failed.
    #[error("{event}: handler failed: {source}")]
    Handler {
        /// Event being dispatched.
        event: String,
        /// Handler's error.
        #[source]
        source: HandlerError,
    },
}

impl DispatchError {
    pub(crate) fn at(stage: Stage, event: &str, source: HandlerError) -> Self {
        match stage {
            Stage::Handler => Self::Handler {
                event: event.to_string(),
                source,
            },
            Stage::Before | Stage::After => Self::Rejected {
                event: event.to_string(),
                stage,
                source,
            },
        }
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Rejected { .. } => "rejected",
            Self::Handler { .. } => "handler",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        assert_eq!(
            DispatchError::NotFound("users.get".into()).to_string(),
            "users.get 404 not found"
        );
    }

    #[test]
    fn stage_maps_to_variant() {
        let err = DispatchError::at(Stage::After, "a", HandlerError::rejected("no"));
        assert_eq!(err.kind(), "rejected");
        assert_eq!(err.to_string(), "a: after interceptor rejected: rejected: no");

        let err = DispatchError::at(Stage::Handler, "a", HandlerError::rejected("no"));
        assert_eq!(err.kind(), "handler");
    }

    #[test]
    fn payload_error_from_serde() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: HandlerError = json_err.into();
        assert!(err.to_string().starts_with("invalid payload"));
    }
}
