//! Registry of live connections and the region directory.

use std::collections::{BTreeMap, HashMap};

use metrics::counter;
use serde_json::json;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vigil_core::{Action, ActionType, ConnectionId};

use crate::metrics::WS_BROADCAST_DROPS_TOTAL;
use crate::websocket::connection::Outbound;

/// What the registry keeps of a connection.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    /// Connection ID.
    pub id: ConnectionId,
    /// Region the connection is attached to.
    pub region: String,
    /// The connection's outbound queue.
    pub outbound: Outbound,
    /// The connection's destroy signal.
    pub destroy: CancellationToken,
}

/// Tracks live connections for directory broadcasts and shutdown.
pub struct Registry {
    connections: RwLock<HashMap<ConnectionId, ConnectionHandle>>,
    directory: RwLock<BTreeMap<String, String>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            directory: RwLock::new(BTreeMap::new()),
        }
    }

    /// Add a connection.
    pub async fn register(&self, handle: ConnectionHandle) {
        let mut conns = self.connections.write().await;
        let _ = conns.insert(handle.id.clone(), handle);
    }

    /// Remove a connection by ID. Returns whether it was registered.
    pub async fn unregister(&self, id: &ConnectionId) -> bool {
        let mut conns = self.connections.write().await;
        conns.remove(id).is_some()
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Enqueue `action` on every live connection without waiting.
    ///
    /// Returns how many connections accepted it.
    pub async fn broadcast(&self, action: &Action) -> usize {
        let conns = self.connections.read().await;
        let recipients = conns.len();
        debug!(action_type = %action.action_type, recipients, "broadcast to all");
        let mut delivered = 0;
        for conn in conns.values() {
            if conn.outbound.try_send(action.clone()) {
                delivered += 1;
            } else {
                counter!(WS_BROADCAST_DROPS_TOTAL).increment(1);
                warn!(conn = %conn.id.short(), "failed to enqueue broadcast");
            }
        }
        delivered
    }

    /// Current region directory.
    pub async fn directory(&self) -> BTreeMap<String, String> {
        self.directory.read().await.clone()
    }

    /// The directory as a `fetchedRegions` action.
    pub async fn regions_action(&self) -> Action {
        let directory = self.directory.read().await;
        Action::new(ActionType::FetchedRegions, json!(*directory), 0)
    }

    /// Replace the directory; broadcast it to every connection if it changed.
    pub async fn set_directory(&self, directory: BTreeMap<String, String>) -> bool {
        {
            let mut current = self.directory.write().await;
            if *current == directory {
                return false;
            }
            *current = directory;
        }
        let action = self.regions_action().await;
        let delivered = self.broadcast(&action).await;
        info!(delivered, "region directory changed");
        true
    }

    /// Signal every live connection to tear down.
    pub async fn shutdown_all(&self) -> usize {
        let conns = self.connections.read().await;
        for conn in conns.values() {
            conn.destroy.cancel();
        }
        info!(connections = conns.len(), "signalled all connections to close");
        conns.len()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn make_handle(id: &str) -> (ConnectionHandle, mpsc::Receiver<Action>) {
        let (tx, rx) = mpsc::channel(4);
        let handle = ConnectionHandle {
            id: ConnectionId::from(id),
            region: "local".into(),
            outbound: Outbound::new(tx),
            destroy: CancellationToken::new(),
        };
        (handle, rx)
    }

    fn directory(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn register_and_unregister() {
        let registry = Registry::new();
        let (a, _rx_a) = make_handle("conn_a");
        let (b, _rx_b) = make_handle("conn_b");
        registry.register(a).await;
        registry.register(b).await;
        assert_eq!(registry.connection_count().await, 2);

        assert!(registry.unregister(&ConnectionId::from("conn_a")).await);
        assert!(!registry.unregister(&ConnectionId::from("conn_a")).await);
        assert_eq!(registry.connection_count().await, 1);
    }

    #[tokio::test]
    async fn broadcast_reaches_every_connection() {
        let registry = Registry::new();
        let (a, mut rx_a) = make_handle("conn_a");
        let (b, mut rx_b) = make_handle("conn_b");
        registry.register(a).await;
        registry.register(b).await;

        let action = Action::new(ActionType::FetchedRegions, json!({"x": "X"}), 0);
        assert_eq!(registry.broadcast(&action).await, 2);
        assert_eq!(rx_a.recv().await.unwrap(), action);
        assert_eq!(rx_b.recv().await.unwrap(), action);
    }

    #[tokio::test]
    async fn broadcast_skips_closed_queue() {
        let registry = Registry::new();
        let (a, rx_a) = make_handle("conn_a");
        let (b, mut rx_b) = make_handle("conn_b");
        registry.register(a).await;
        registry.register(b).await;
        drop(rx_a);

        let action = Action::new(ActionType::FetchedRegions, json!({}), 0);
        assert_eq!(registry.broadcast(&action).await, 1);
        assert!(rx_b.recv().await.is_some());
    }

    #[tokio::test]
    async fn set_directory_broadcasts_only_on_change() {
        let registry = Registry::new();
        let (a, mut rx) = make_handle("conn_a");
        registry.register(a).await;

        let dir = directory(&[("local", "Local"), ("eu", "Europe")]);
        assert!(registry.set_directory(dir.clone()).await);
        let sent = rx.recv().await.unwrap();
        assert!(sent.is(ActionType::FetchedRegions));
        assert_eq!(sent.payload, json!({"eu": "Europe", "local": "Local"}));

        assert!(!registry.set_directory(dir.clone()).await);
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.directory().await, dir);
    }

    #[tokio::test]
    async fn regions_action_reflects_directory() {
        let registry = Registry::new();
        assert_eq!(registry.regions_action().await.payload, json!({}));
        let _ = registry.set_directory(directory(&[("local", "local")])).await;
        let action = registry.regions_action().await;
        assert_eq!(action.payload, json!({"local": "local"}));
        assert_eq!(action.index, 0);
    }

    #[tokio::test]
    async fn shutdown_all_cancels_destroy_tokens() {
        let registry = Registry::new();
        let (a, _rx_a) = make_handle("conn_a");
        let (b, _rx_b) = make_handle("conn_b");
        let tokens = [a.destroy.clone(), b.destroy.clone()];
        registry.register(a).await;
        registry.register(b).await;

        assert_eq!(registry.shutdown_all().await, 2);
        assert!(tokens.iter().all(CancellationToken::is_cancelled));
    }
}
