//! # skein-router
//!
//! Event router shared by skein servers and clients.
//!
//! - [`router`]: prefix trie over `/`- or `.`-delimited events, with
//!   `:param` and `*catch_all` capture, route groups and removal
//! - [`handler`]: the [`Handler`] trait and the before/handler/after chain
//! - [`mode`]: concurrent or sequential dispatch of one connection's frames
//! - [`context`]: the per-call [`Context`] shared by the stages of one call
//! - [`error`]: registration, handler and dispatch errors

#![deny(unsafe_code)]

pub mod context;
pub mod error;
pub mod handler;
pub mod mode;
pub mod params;
pub mod router;

pub use context::{Context, RouteContext};
pub use error::{DispatchError, HandlerError, RouteError, Stage};
pub use handler::{BoxHandler, FnHandler, Handler, Route, from_fn};
pub use mode::DispatchMode;
pub use params::Params;
pub use router::{Group, Resolved, Router};
