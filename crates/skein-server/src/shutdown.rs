//! Server shutdown: one cancellation token for every loop, plus a tracker
//! of live session loops so a drain can wait for their close callbacks.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// How a drain ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Listeners and sessions all finished.
    Complete,
    /// The deadline passed with this many sessions still running.
    TimedOut {
        /// Sessions still running.
        sessions: usize,
    },
}

/// Stops the listeners and every session loop of one server.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    sessions: TaskTracker,
}

impl ShutdownCoordinator {
    /// Coordinator with no sessions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token the listeners and session loops select on.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wrap a session loop so [`ShutdownCoordinator::drain`] waits for it.
    pub fn track_session<F>(&self, session: F) -> impl Future<Output = F::Output> + Send + 'static
    where
        F: Future + Send + 'static,
    {
        self.sessions.track_future(session)
    }

    /// Number of session loops still running.
    pub fn live_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Whether a drain has started.
    pub fn is_draining(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel every loop, then wait up to `timeout` for the listener tasks
    /// and the tracked sessions. Close callbacks of tracked sessions have run
    /// when this returns [`DrainOutcome::Complete`].
    pub async fn drain(&self, listeners: Vec<JoinHandle<()>>, timeout: Duration) -> DrainOutcome {
        self.token.cancel();
        let _ = self.sessions.close();
        info!(
            listeners = listeners.len(),
            sessions = self.sessions.len(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "draining server"
        );

        let all = async {
            let _ = futures::future::join_all(listeners).await;
            self.sessions.wait().await;
        };
        if tokio::time::timeout(timeout, all).await.is_ok() {
            DrainOutcome::Complete
        } else {
            let sessions = self.sessions.len();
            warn!(sessions, ?timeout, "drain deadline passed with sessions still open");
            DrainOutcome::TimedOut { sessions }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
