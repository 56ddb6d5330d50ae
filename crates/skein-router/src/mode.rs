//! Dispatch ordering policy.

use serde::{Deserialize, Serialize};

/// How frames decoded from one connection are handed to the router.
///
/// Decoding is always in arrival order; this only decides whether handlers
/// of successive frames may overlap.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Each frame is dispatched on its own task; handlers may overlap and
    /// finish out of order.
    #[default]
    Concurrent,
    /// The read loop awaits each handler before decoding the next frame.
    Sequential,
}

impl DispatchMode {
    /// `Sequential` when `sequential` is set, `Concurrent` otherwise.
    pub fn from_sequential(sequential: bool) -> Self {
        if sequential {
            Self::Sequential
        } else {
            Self::Concurrent
        }
    }
}
