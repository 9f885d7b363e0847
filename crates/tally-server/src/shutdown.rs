//! Graceful shutdown coordination via `CancellationToken`.
//!
//! Every push session task is spawned through the coordinator's
//! [`TaskTracker`], so shutdown can cancel them all and then wait for them to
//! send their close frames.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Default time allowed for sessions to drain.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Coordinates graceful shutdown across all server tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of the root cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Child token, cancelled with the root or on its own.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Spawn a task that shutdown waits for.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(future)
    }

    /// Tracked tasks still running.
    pub fn task_count(&self) -> usize {
        self.tracker.len()
    }

    /// Signal shutdown without waiting.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel everything and wait up to `timeout` for tracked tasks.
    ///
    /// Returns `true` when every task finished in time.
    pub async fn graceful_shutdown(&self, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();
        let _ = self.tracker.close();
        info!(
            task_count = self.tracker.len(),
            timeout_ms = timeout.as_millis(),
            "waiting for sessions to drain"
        );

        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            warn!(remaining = self.tracker.len(), "shutdown timed out after {timeout:?}");
            false
        } else {
            true
        }
    }
}
