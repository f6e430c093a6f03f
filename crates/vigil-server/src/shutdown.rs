//! Process-wide shutdown via a root `CancellationToken`.
//!
//! Every poller watches the root token directly; every connection's destroy
//! token is a child of it, and every watch token a grandchild.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::registry::Registry;

/// Default time to wait for tasks before giving up.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Coordinates graceful shutdown of pollers, sessions and the listener.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Get a clone of the root token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Shut everything down and wait.
    ///
    /// 1. Cancel the root token (pollers, listener and connections see it)
    /// 2. Signal every registered connection
    /// 3. Wait up to `timeout` for the sessions and the given handles
    pub async fn graceful_shutdown(
        &self,
        registry: &Registry,
        sessions: &TaskTracker,
        handles: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        let connections = registry.shutdown_all().await;
        let _ = sessions.close();
        info!(
            task_count = handles.len(),
            connections,
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );

        let drain = async {
            let _ = futures::future::join_all(handles).await;
            sessions.wait().await;
        };

        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, some tasks may still be running");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
    }

    #[test]
    fn shutdown_reaches_descendant_tokens() {
        let coord = ShutdownCoordinator::new();
        let connection = coord.token().child_token();
        let watch = connection.child_token();
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(connection.is_cancelled());
        assert!(watch.is_cancelled());
    }

    #[test]
    fn cancelling_a_child_leaves_root_alone() {
        let coord = ShutdownCoordinator::default();
        let connection = coord.token().child_token();
        connection.cancel();
        assert!(!coord.is_shutting_down());
    }

    #[tokio::test]
    async fn graceful_shutdown_awaits_tasks_and_sessions() {
        let coord = ShutdownCoordinator::new();
        let registry = Registry::new();
        let sessions = TaskTracker::new();

        let poller_token = coord.token();
        let poller = tokio::spawn(async move { poller_token.cancelled().await });
        let session_token = coord.token().child_token();
        let _ = sessions.spawn(async move { session_token.cancelled().await });

        coord
            .graceful_shutdown(&registry, &sessions, vec![poller], None)
            .await;
        assert!(coord.is_shutting_down());
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn graceful_shutdown_times_out() {
        let coord = ShutdownCoordinator::new();
        let registry = Registry::new();
        let sessions = TaskTracker::new();

        // A task that ignores cancellation
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });

        coord
            .graceful_shutdown(&registry, &sessions, vec![handle], Some(Duration::from_millis(100)))
            .await;
        assert!(coord.is_shutting_down());
    }
}
