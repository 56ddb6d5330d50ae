//! Handlers and the before/handler/after chain attached to a route.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{HandlerError, Stage};

/// Trait implemented by every event handler and interceptor.
///
/// The context is borrowed mutably for the duration of one stage, so
/// interceptors can stash values for later stages of the same call.
#[async_trait]
pub trait Handler<C: Send + 'static>: Send + Sync {
    /// Run this stage.
    async fn handle(&self, ctx: &mut C) -> Result<(), HandlerError>;
}

/// Shared handler pointer.
pub type BoxHandler<C> = Arc<dyn Handler<C>>;

/// Adapter turning a synchronous closure into a [`Handler`].
pub struct FnHandler<F>(F);

/// Wrap a synchronous closure. Handy for interceptors that only inspect the
/// context.
pub fn from_fn<C, F>(f: F) -> FnHandler<F>
where
    C: Send + 'static,
    F: Fn(&mut C) -> Result<(), HandlerError> + Send + Sync,
{
    FnHandler(f)
}

#[async_trait]
impl<C, F> Handler<C> for FnHandler<F>
where
    C: Send + 'static,
    F: Fn(&mut C) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, ctx: &mut C) -> Result<(), HandlerError> {
        (self.0)(ctx)
    }
}

/// A handler with its ordered `before` and `after` interceptors.
pub struct Route<C: Send + 'static> {
    handler: BoxHandler<C>,
    before: Vec<BoxHandler<C>>,
    after: Vec<BoxHandler<C>>,
}

impl<C: Send + 'static> Clone for Route<C> {
    fn clone(&self) -> Self {
        Self {
            handler: Arc::clone(&self.handler),
            before: self.before.clone(),
            after: self.after.clone(),
        }
    }
}

impl<C: Send + 'static> Route<C> {
    /// Route running `handler` with no interceptors.
    pub fn new(handler: impl Handler<C> + 'static) -> Self {
        Self::from_arc(Arc::new(handler))
    }

    /// Route around an already shared handler.
    pub fn from_arc(handler: BoxHandler<C>) -> Self {
        Self {
            handler,
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    /// Append a `before` interceptor.
    #[must_use]
    pub fn before(mut self, interceptor: impl Handler<C> + 'static) -> Self {
        self.before.push(Arc::new(interceptor));
        self
    }

    /// Append an `after` interceptor.
    #[must_use]
    pub fn after(mut self, interceptor: impl Handler<C> + 'static) -> Self {
        self.after.push(Arc::new(interceptor));
        self
    }

    /// Put shared interceptors in front of this route's own.
    pub(crate) fn wrap(mut self, before: &[BoxHandler<C>], after: &[BoxHandler<C>]) -> Self {
        let mut b = before.to_vec();
        b.append(&mut self.before);
        self.before = b;
        let mut a = after.to_vec();
        a.append(&mut self.after);
        self.after = a;
        self
    }

    /// Number of `before` and `after` interceptors.
    pub fn interceptor_counts(&self) -> (usize, usize) {
        (self.before.len(), self.after.len())
    }

    /// Run before chain, handler, after chain. The first error stops
    /// everything after it.
    pub async fn run(&self, ctx: &mut C) -> Result<(), (Stage, HandlerError)> {
        for interceptor in &self.before {
            interceptor
                .handle(ctx)
                .await
                .map_err(|e| (Stage::Before, e))?;
        }
        self.handler
            .handle(ctx)
            .await
            .map_err(|e| (Stage::Handler, e))?;
        for interceptor in &self.after {
            interceptor
                .handle(ctx)
                .await
                .map_err(|e| (Stage::After, e))?;
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[derive(Default)]
    struct Trace(Vec<&'static str>);

    struct Push(&'static str);

    #[async_trait]
    impl Handler<Trace> for Push {
        async fn handle(&self, ctx: &mut Trace) -> Result<(), HandlerError> {
            ctx.0.push(self.0);
            Ok(())
        }
    }

    struct Deny;

    #[async_trait]
    impl Handler<Trace> for Deny {
        async fn handle(&self, _ctx: &mut Trace) -> Result<(), HandlerError> {
            Err(HandlerError::rejected("denied"))
        }
    }

    #[tokio::test]
    async fn chain_runs_in_order() {
        let route = Route::new(Push("handler"))
            .before(Push("b1"))
            .before(Push("b2"))
            .after(Push("a1"));
        let mut trace = Trace::default();
        route.run(&mut trace).await.unwrap();
        assert_eq!(trace.0, vec!["b1", "b2", "handler", "a1"]);
    }

    #[tokio::test]
    async fn before_rejection_skips_handler() {
        let route = Route::new(Push("handler"))
            .before(Deny)
            .after(Push("a1"));
        let mut trace = Trace::default();
        let (stage, _) = route.run(&mut trace).await.unwrap_err();
        assert_eq!(stage, Stage::Before);
        assert!(trace.0.is_empty());
    }

    #[tokio::test]
    async fn after_rejection_stops_remaining_after() {
        let route = Route::new(Push("handler"))
            .after(Deny)
            .after(Push("a2"));
        let mut trace = Trace::default();
        assert_matches!(route.run(&mut trace).await, Err((Stage::After, _)));
        assert_eq!(trace.0, vec!["handler"]);
    }

    #[tokio::test]
    async fn closure_interceptor() {
        let route = Route::new(Push("handler")).before(from_fn(|t: &mut Trace| {
            t.0.push("closure");
            Ok(())
        }));
        let mut trace = Trace::default();
        route.run(&mut trace).await.unwrap();
        assert_eq!(trace.0, vec!["closure", "handler"]);
    }

    #[test]
    fn wrap_prepends_shared_interceptors() {
        let shared: Vec<BoxHandler<Trace>> = vec![Arc::new(Push("g"))];
        let route = Route::new(Push("h")).before(Push("r")).wrap(&shared, &shared);
        assert_eq!(route.interceptor_counts(), (2, 1));
    }
}
