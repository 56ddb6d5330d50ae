//! Application callbacks shared by the WebSocket and datagram loops.

use std::sync::Arc;

use skein_core::WireMessage;

use crate::connection::ConnectionId;
use crate::errors::{CloseReason, ConfigError, ServerError};
use crate::session::Session;

/// Called once a connection is registered.
pub type OnOpen = Arc<dyn Fn(Session) + Send + Sync>;
/// Called once a connection is unregistered.
pub type OnClose = Arc<dyn Fn(ConnectionId, CloseReason) + Send + Sync>;
/// Called for every runtime failure that has no caller to return to.
pub type OnError = Arc<dyn Fn(&ServerError) + Send + Sync>;
/// Called for transport messages that are not frames.
pub type OnMessage = Arc<dyn Fn(&Session, &WireMessage) + Send + Sync>;

/// Builder-side slots; every required one must be filled before `build`.
#[derive(Default, Clone)]
pub(crate) struct CallbackSlots {
    pub(crate) on_open: Option<OnOpen>,
    pub(crate) on_close: Option<OnClose>,
    pub(crate) on_error: Option<OnError>,
    pub(crate) on_message: Option<OnMessage>,
}

impl CallbackSlots {
    pub(crate) fn build(self) -> Result<Callbacks, ConfigError> {
        Ok(Callbacks {
            on_open: self.on_open.ok_or(ConfigError::MissingCallback("on_open"))?,
            on_close: self.on_close.ok_or(ConfigError::MissingCallback("on_close"))?,
            on_error: self.on_error.ok_or(ConfigError::MissingCallback("on_error"))?,
            on_message: self.on_message,
        })
    }
}

/// Resolved callback set.
#[derive(Clone)]
pub(crate) struct Callbacks {
    pub(crate) on_open: OnOpen,
    pub(crate) on_close: OnClose,
    pub(crate) on_error: OnError,
    pub(crate) on_message: Option<OnMessage>,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_message", &self.on_message.is_some())
            .finish_non_exhaustive()
    }
}

impl Callbacks {
    pub(crate) fn open(&self, session: Session) {
        (self.on_open)(session);
    }

    pub(crate) fn close(&self, id: ConnectionId, reason: CloseReason) {
        (self.on_close)(id, reason);
    }

    pub(crate) fn error(&self, err: &ServerError) {
        (self.on_error)(err);
    }

    /// Hand `message` to `on_message`; returns false when none is set.
    pub(crate) fn message(&self, session: &Session, message: &WireMessage) -> bool {
        match &self.on_message {
            Some(cb) => {
                cb(session, message);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn missing_callbacks_are_named() {
        let mut slots = CallbackSlots::default();
        assert_matches!(slots.clone().build(), Err(ConfigError::MissingCallback("on_open")));
        slots.on_open = Some(Arc::new(|_| {}));
        assert_matches!(slots.clone().build(), Err(ConfigError::MissingCallback("on_close")));
        slots.on_close = Some(Arc::new(|_, _| {}));
        assert_matches!(slots.clone().build(), Err(ConfigError::MissingCallback("on_error")));
        slots.on_error = Some(Arc::new(|_| {}));
        let callbacks = slots.build().unwrap();
        assert!(callbacks.on_message.is_none());
    }
}
