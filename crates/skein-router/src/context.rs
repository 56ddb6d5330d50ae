//! Per-call context handed through a route's chain.

use std::borrow::Cow;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::error::HandlerError;
use crate::params::Params;

/// Contexts the router can fill with captured parameters.
pub trait RouteContext: Send + 'static {
    /// Store the parameters captured while resolving the event.
    fn set_params(&mut self, params: Params);
}

/// Standard context: the session the frame arrived on, the decoded frame,
/// the captured parameters and a typed scratch slot shared by the stages of
/// one call.
#[derive(Debug)]
pub struct Context<S, T = ()> {
    /// Handle for replying and pushing.
    pub session: S,
    /// Correlation id of the inbound frame.
    pub id: i64,
    /// Event name as received.
    pub event: String,
    /// Raw body.
    pub body: Bytes,
    /// Parameters captured from the event.
    pub params: Params,
    /// Per-call scratch state.
    pub state: T,
}

impl<S, T: Default> Context<S, T> {
    /// Context for one inbound frame.
    pub fn new(session: S, id: i64, event: impl Into<String>, body: Bytes) -> Self {
        Self {
            session,
            id,
            event: event.into(),
            body,
            params: Params::default(),
            state: T::default(),
        }
    }
}

impl<S, T> Context<S, T> {
    /// Body decoded as JSON.
    pub fn json<D: DeserializeOwned>(&self) -> Result<D, HandlerError> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Body as lossy UTF-8.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Captured parameter by name.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }
}

impl<S, T> RouteContext for Context<S, T>
where
    S: Send + 'static,
    T: Send + 'static,
{
    fn set_params(&mut self, params: Params) {
        self.params = params;
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Login {
        name: String,
    }

    #[test]
    fn json_body() {
        let ctx: Context<()> = Context::new((), 1, "login", Bytes::from_static(br#"{"name":"ada"}"#));
        let login: Login = ctx.json().unwrap();
        assert_eq!(login.name, "ada");
    }

    #[test]
    fn bad_json_is_payload_error() {
        let ctx: Context<()> = Context::new((), 1, "login", Bytes::from_static(b"nope"));
        assert_matches!(ctx.json::<Login>(), Err(HandlerError::Payload(_)));
    }

    #[test]
    fn params_are_set() {
        let mut ctx: Context<(), u32> = Context::new((), 0, "users.7", Bytes::new());
        let mut params = Params::default();
        params.push("id", "7");
        ctx.set_params(params);
        assert_eq!(ctx.param("id"), Some("7"));
        assert_eq!(ctx.state, 0);
    }
}
