//! Per-client connection state.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, warn};
use vigil_core::{Action, ConnectionId};

use crate::config::WatchTimings;
use crate::poller::SharedResource;
use crate::region::Region;
use crate::registry::{ConnectionHandle, Registry};
use crate::watch::{EntityKind, EntityWatch, SharedWatch};
use crate::watch_set::WatchSet;

/// Sending half of a connection's outbound queue.
#[derive(Clone, Debug)]
pub struct Outbound {
    tx: mpsc::Sender<Action>,
}

impl Outbound {
    /// Wrap the sender of a bounded queue.
    pub fn new(tx: mpsc::Sender<Action>) -> Self {
        Self { tx }
    }

    /// Enqueue `action`, waiting for capacity.
    ///
    /// Returns `false` if `token` fires first or the queue is closed; callers
    /// treat both as a normal exit.
    pub async fn send(&self, action: Action, token: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            () = token.cancelled() => false,
            sent = self.tx.send(action) => sent.is_ok(),
        }
    }

    /// Enqueue `action` without waiting. Returns `false` if full or closed.
    pub fn try_send(&self, action: Action) -> bool {
        self.tx.try_send(action).is_ok()
    }

    /// Whether the receiving side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// What every connection of a server shares.
#[derive(Clone)]
pub struct ConnectionContext {
    /// Region the connection is attached to.
    pub region: Arc<Region>,
    /// Live-connection registry.
    pub registry: Arc<Registry>,
    /// Watch loop timings.
    pub timings: WatchTimings,
    /// Process-wide shutdown token; each connection's destroy token is a child.
    pub shutdown: CancellationToken,
}

/// A connected client: its queue, watches and owned tasks.
pub struct Connection {
    id: ConnectionId,
    ctx: ConnectionContext,
    outbound: Outbound,
    destroy: CancellationToken,
    watches: Arc<WatchSet>,
    tracker: TaskTracker,
}

impl Connection {
    /// Create a connection writing to `tx`.
    pub fn new(id: ConnectionId, ctx: ConnectionContext, tx: mpsc::Sender<Action>) -> Self {
        let destroy = ctx.shutdown.child_token();
        Self {
            id,
            ctx,
            outbound: Outbound::new(tx),
            destroy,
            watches: Arc::new(WatchSet::new()),
            tracker: TaskTracker::new(),
        }
    }

    /// Connection ID.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Region this connection watches.
    pub fn region(&self) -> &Arc<Region> {
        &self.ctx.region
    }

    /// Cancelled when the connection is being destroyed.
    pub fn destroy_token(&self) -> &CancellationToken {
        &self.destroy
    }

    /// Active watch keys.
    pub fn watches(&self) -> &Arc<WatchSet> {
        &self.watches
    }

    /// Number of tasks spawned by this connection that are still running.
    pub fn running_tasks(&self) -> usize {
        self.tracker.len()
    }

    /// Handle for the registry.
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            id: self.id.clone(),
            region: self.ctx.region.name().to_string(),
            outbound: self.outbound.clone(),
            destroy: self.destroy.clone(),
        }
    }

    /// Add this connection to the registry.
    pub async fn register(&self) {
        self.ctx.registry.register(self.handle()).await;
    }

    /// Reply with the region directory from a background task.
    pub fn reply_regions(&self) {
        let registry = self.ctx.registry.clone();
        let outbound = self.outbound.clone();
        let token = self.destroy.clone();
        let _ = self.tracker.spawn(
            async move {
                let action = registry.regions_action().await;
                if outbound.send(action, &token).await {
                    debug!("sent region directory");
                }
            }
            .in_current_span(),
        );
    }

    /// Attach to a shared resource. Returns `false` if already attached.
    pub fn attach(&self, resource: SharedResource) -> bool {
        let key = resource.key();
        let Some(handle) = self.watches.try_insert(key, &self.destroy) else {
            warn!(watch_key = key, "already watching");
            return false;
        };
        let watch = SharedWatch {
            observer: self.ctx.region.channel(resource).subscribe(),
            event_type: resource.event_type(),
            handle,
            watches: self.watches.clone(),
            outbound: self.outbound.clone(),
        };
        let _ = self.tracker.spawn(watch.run().in_current_span());
        info!(watch_key = key, "watch started");
        true
    }

    /// Start a dedicated watch on one entity. Returns `false` if already watching.
    pub fn watch_entity(&self, kind: EntityKind, entity_id: String) -> bool {
        let key = kind.watch_key(&entity_id);
        let Some(handle) = self.watches.try_insert(&key, &self.destroy) else {
            warn!(watch_key = %key, "already watching");
            return false;
        };
        let watch = EntityWatch {
            kind,
            entity_id,
            backend: self.ctx.region.backend().clone(),
            timings: self.ctx.timings,
            handle,
            watches: self.watches.clone(),
            outbound: self.outbound.clone(),
        };
        let _ = self.tracker.spawn(watch.run().in_current_span());
        info!(watch_key = %key, "watch started");
        true
    }

    /// Stop the watch on `key`. Returns `false` if it was not active.
    pub fn unwatch(&self, key: &str) -> bool {
        if self.watches.remove(key) {
            info!(watch_key = key, "watch stopped");
            true
        } else {
            debug!(watch_key = key, "not watching");
            false
        }
    }

    /// Stop every watch, leave the registry and wait for owned tasks.
    ///
    /// The outbound queue closes once the connection is dropped after this.
    pub async fn teardown(&self) {
        let cleared = self.watches.clear();
        let _ = self.ctx.registry.unregister(&self.id).await;
        self.destroy.cancel();
        let _ = self.tracker.close();

        let timeout = self.ctx.timings.teardown_timeout;
        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            warn!(
                remaining = self.tracker.len(),
                "tasks still running after {timeout:?}"
            );
        }
        debug!(cleared, "connection torn down");
    }
}
