//! Prefix trie keyed by event segments.
//!
//! Events are split on both `/` and `.`, empty segments are ignored, so
//! `/users/list`, `users.list` and `users/list/` all address the same route.
//! A segment starting with `:` captures one segment; one starting with `*`
//! captures the rest of the event (at least one segment) and must be last.
//!
//! Resolution prefers literal children, then the parameter child, then the
//! catch-all, backtracking when a branch fails to consume the whole event.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::context::RouteContext;
use crate::error::{DispatchError, RouteError};
use crate::handler::{BoxHandler, Handler, Route};
use crate::params::Params;

/// Split an event or pattern into its segments.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(['/', '.']).filter(|s| !s.is_empty())
}

struct Entry<C: Send + 'static> {
    keys: Vec<String>,
    route: Arc<Route<C>>,
}

struct Node<C: Send + 'static> {
    literals: HashMap<String, Node<C>>,
    param: Option<(String, Box<Node<C>>)>,
    catch_all: Option<(String, Entry<C>)>,
    entry: Option<Entry<C>>,
}

impl<C: Send + 'static> Default for Node<C> {
    fn default() -> Self {
        Self {
            literals: HashMap::new(),
            param: None,
            catch_all: None,
            entry: None,
        }
    }
}

impl<C: Send + 'static> Node<C> {
    fn is_empty(&self) -> bool {
        self.literals.is_empty()
            && self.param.is_none()
            && self.catch_all.is_none()
            && self.entry.is_none()
    }

    fn find<'a>(&'a self, segs: &[&str], ignore_case: bool, values: &mut Vec<String>) -> Option<&'a Entry<C>> {
        let Some((head, rest)) = segs.split_first() else {
            return self.entry.as_ref();
        };

        let literal: Cow<'_, str> = if ignore_case {
            Cow::Owned(head.to_lowercase())
        } else {
            Cow::Borrowed(*head)
        };
        if let Some(found) = self
            .literals
            .get(literal.as_ref())
            .and_then(|child| child.find(rest, ignore_case, values))
        {
            return Some(found);
        }

        if let Some((_, child)) = &self.param {
            values.push((*head).to_string());
            if let Some(found) = child.find(rest, ignore_case, values) {
                return Some(found);
            }
            let _ = values.pop();
        }

        if let Some((_, entry)) = &self.catch_all {
            values.push(segs.join("/"));
            return Some(entry);
        }
        None
    }

    /// Walk `segs` without creating nodes and report the conflict, if any,
    /// that inserting them would hit. Below the first missing node nothing
    /// can conflict.
    fn check(&self, pattern: &str, segs: &[Segment<'_>]) -> Result<(), RouteError> {
        let Some((head, rest)) = segs.split_first() else {
            return match self.entry {
                Some(_) => Err(RouteError::Duplicate(pattern.to_string())),
                None => Ok(()),
            };
        };
        match head {
            Segment::Literal(lit) => self
                .literals
                .get(lit.as_ref())
                .map_or(Ok(()), |child| child.check(pattern, rest)),
            Segment::Param(name) => match &self.param {
                Some((existing, _)) if existing.as_str() != *name => Err(RouteError::ParamConflict {
                    pattern: pattern.to_string(),
                    existing: existing.clone(),
                    new: (*name).to_string(),
                }),
                Some((_, child)) => child.check(pattern, rest),
                None => Ok(()),
            },
            Segment::CatchAll(_) if self.catch_all.is_some() => {
                Err(RouteError::Duplicate(pattern.to_string()))
            }
            Segment::CatchAll(_) => Ok(()),
        }
    }

    /// Remove the entry at `segs`; returns it and prunes emptied branches.
    fn remove(&mut self, segs: &[Segment<'_>]) -> Option<Arc<Route<C>>> {
        let Some((head, rest)) = segs.split_first() else {
            return self.entry.take().map(|e| e.route);
        };
        match head {
            Segment::Literal(lit) => {
                let child = self.literals.get_mut(lit.as_ref())?;
                let removed = child.remove(rest);
                if child.is_empty() {
                    let _ = self.literals.remove(lit.as_ref());
                }
                removed
            }
            Segment::Param(_) => {
                let (_, child) = self.param.as_mut()?;
                let removed = child.remove(rest);
                if child.is_empty() {
                    self.param = None;
                }
                removed
            }
            Segment::CatchAll(_) => self.catch_all.take().map(|(_, e)| e.route),
        }
    }
}

enum Segment<'a> {
    Literal(Cow<'a, str>),
    Param(&'a str),
    CatchAll(&'a str),
}

fn parse_pattern<'a>(pattern: &'a str, ignore_case: bool) -> Result<Vec<Segment<'a>>, RouteError> {
    let raw: Vec<&str> = segments(pattern).collect();
    let last = raw.len().saturating_sub(1);
    raw.into_iter()
        .enumerate()
        .map(|(i, seg)| {
            if let Some(name) = seg.strip_prefix(':') {
                if name.is_empty() {
                    return Err(RouteError::UnnamedParam(pattern.to_string()));
                }
                Ok(Segment::Param(name))
            } else if let Some(name) = seg.strip_prefix('*') {
                if name.is_empty() {
                    return Err(RouteError::UnnamedParam(pattern.to_string()));
                }
                if i != last {
                    return Err(RouteError::CatchAllNotLast(pattern.to_string()));
                }
                Ok(Segment::CatchAll(name))
            } else if ignore_case {
                Ok(Segment::Literal(Cow::Owned(seg.to_lowercase())))
            } else {
                Ok(Segment::Literal(Cow::Borrowed(seg)))
            }
        })
        .collect()
}

/// A route resolved for one event.
pub struct Resolved<'r, C: Send + 'static> {
    /// Matching route.
    pub route: &'r Arc<Route<C>>,
    /// Captured parameters.
    pub params: Params,
}

/// Event router.
///
/// Built up front, then shared read-only (typically in an `Arc`) by every
/// connection's dispatch.
pub struct Router<C: Send + 'static> {
    root: Node<C>,
    ignore_case: bool,
    len: usize,
}

impl<C: Send + 'static> Default for Router<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Send + 'static> Router<C> {
    /// Empty, case-sensitive router.
    pub fn new() -> Self {
        Self {
            root: Node::default(),
            ignore_case: false,
            len: 0,
        }
    }

    /// Match literal segments case-insensitively. Set before registering.
    #[must_use]
    pub fn ignore_case(mut self, ignore: bool) -> Self {
        self.ignore_case = ignore;
        self
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Register a route under `pattern`. On error the trie is unchanged.
    pub fn register(&mut self, pattern: &str, route: Route<C>) -> Result<(), RouteError> {
        let segs = parse_pattern(pattern, self.ignore_case)?;
        self.root.check(pattern, &segs)?;

        let mut keys = Vec::new();
        let mut node = &mut self.root;
        for seg in segs {
            match seg {
                Segment::Literal(lit) => {
                    node = node.literals.entry(lit.into_owned()).or_default();
                }
                Segment::Param(name) => {
                    keys.push(name.to_string());
                    let (_, child) = node
                        .param
                        .get_or_insert_with(|| (name.to_string(), Box::default()));
                    node = child.as_mut();
                }
                Segment::CatchAll(name) => {
                    keys.push(name.to_string());
                    node.catch_all = Some((
                        name.to_string(),
                        Entry {
                            keys,
                            route: Arc::new(route),
                        },
                    ));
                    self.len += 1;
                    debug!(pattern, "route registered");
                    return Ok(());
                }
            }
        }

        node.entry = Some(Entry {
            keys,
            route: Arc::new(route),
        });
        self.len += 1;
        debug!(pattern, "route registered");
        Ok(())
    }

    /// Register a bare handler under `pattern`.
    pub fn route(&mut self, pattern: &str, handler: impl Handler<C> + 'static) -> Result<(), RouteError> {
        self.register(pattern, Route::new(handler))
    }

    /// Remove the route registered under `pattern`.
    pub fn remove(&mut self, pattern: &str) -> Option<Arc<Route<C>>> {
        let segs = parse_pattern(pattern, self.ignore_case).ok()?;
        let removed = self.root.remove(&segs);
        if removed.is_some() {
            self.len -= 1;
            debug!(pattern, "route removed");
        }
        removed
    }

    /// Open a group of routes sharing `prefix` and interceptors.
    pub fn group(&mut self, prefix: &str) -> Group<'_, C> {
        Group {
            router: self,
            prefix: prefix.to_string(),
            before: Vec::new(),
            after: Vec::new(),
        }
    }

    /// Find the route for `event`.
    pub fn resolve(&self, event: &str) -> Option<Resolved<'_, C>> {
        let segs: Vec<&str> = segments(event).collect();
        let mut values = Vec::new();
        let entry = self.root.find(&segs, self.ignore_case, &mut values)?;
        Some(Resolved {
            route: &entry.route,
            params: Params::from_parts(&entry.keys, values),
        })
    }
}

impl<C: RouteContext> Router<C> {
    /// Resolve `event`, store its parameters in `ctx` and run the chain.
    pub async fn dispatch(&self, event: &str, ctx: &mut C) -> Result<(), DispatchError> {
        let Some(resolved) = self.resolve(event) else {
            return Err(DispatchError::NotFound(event.to_string()));
        };
        let route = Arc::clone(resolved.route);
        ctx.set_params(resolved.params);
        route
            .run(ctx)
            .await
            .map_err(|(stage, source)| DispatchError::at(stage, event, source))
    }
}

/// Routes registered under a shared prefix with shared interceptors.
///
/// Group interceptors run before the route's own in both chains.
pub struct Group<'r, C: Send + 'static> {
    router: &'r mut Router<C>,
    prefix: String,
    before: Vec<BoxHandler<C>>,
    after: Vec<BoxHandler<C>>,
}

impl<C: Send + 'static> Group<'_, C> {
    /// Add a shared `before` interceptor.
    #[must_use]
    pub fn before(mut self, interceptor: impl Handler<C> + 'static) -> Self {
        self.before.push(Arc::new(interceptor));
        self
    }

    /// Add a shared `after` interceptor.
    #[must_use]
    pub fn after(mut self, interceptor: impl Handler<C> + 'static) -> Self {
        self.after.push(Arc::new(interceptor));
        self
    }

    /// Register `route` under `prefix/pattern`.
    pub fn register(&mut self, pattern: &str, route: Route<C>) -> Result<&mut Self, RouteError> {
        let full = format!("{}/{}", self.prefix, pattern);
        self.router
            .register(&full, route.wrap(&self.before, &self.after))?;
        Ok(self)
    }

    /// Register a bare handler under `prefix/pattern`.
    pub fn route(&mut self, pattern: &str, handler: impl Handler<C> + 'static) -> Result<&mut Self, RouteError> {
        self.register(pattern, Route::new(handler))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
