//! Graceful shutdown coordination via `CancellationToken`.
//!
//! Every connection and the worker pool hang off the coordinator's token;
//! sessions are tracked so shutdown can wait for them to wind down.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Default timeout for graceful shutdown before giving up on stragglers.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Coordinates shutdown across the listener, the pool and every session.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    sessions: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            sessions: TaskTracker::new(),
        }
    }

    /// A clone of the root cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// A token cancelled with the root but cancellable on its own.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Count `fut` as a live session until it completes.
    pub fn track_session<F: Future>(&self, fut: F) -> impl Future<Output = F::Output> + use<F> {
        self.sessions.track_future(fut)
    }

    /// Sessions currently running.
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Perform a graceful shutdown.
    ///
    /// 1. Cancel the root token (listener, pool and every connection)
    /// 2. Wait up to `timeout` for `handles` and all tracked sessions
    /// 3. Abort any handle still running after the timeout
    ///
    /// Returns `true` if everything finished in time.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Duration) -> bool {
        self.shutdown();
        let _ = self.sessions.close();
        info!(
            task_count = handles.len(),
            sessions = self.sessions.len(),
            timeout_secs = timeout.as_secs_f64(),
            "waiting for tasks to complete"
        );

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let drain = async {
            let _ = futures::future::join_all(handles).await;
            self.sessions.wait().await;
        };

        if tokio::time::timeout(timeout, drain).await.is_ok() {
            info!("shutdown complete");
            true
        } else {
            warn!(
                sessions = self.sessions.len(),
                "shutdown timed out after {timeout:?}, aborting remaining tasks"
            );
            for abort in aborts {
                abort.abort();
            }
            false
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
