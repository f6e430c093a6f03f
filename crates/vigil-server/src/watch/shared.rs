//! Forwarding loop for a shared resource.

use std::sync::Arc;

use metrics::gauge;
use tracing::debug;
use vigil_core::ActionType;

use crate::metrics::WATCHES_ACTIVE;
use crate::multicast::Observer;
use crate::watch_set::{WatchHandle, WatchSet};
use crate::websocket::connection::Outbound;

/// One connection's subscription to a region's multicast channel.
pub struct SharedWatch {
    /// Observer created when the watch was registered.
    pub observer: Observer,
    /// Only actions of this type are forwarded.
    pub event_type: ActionType,
    /// Registration in the connection's watch set.
    pub handle: WatchHandle,
    /// The connection's watch set.
    pub watches: Arc<WatchSet>,
    /// The connection's outbound queue.
    pub outbound: Outbound,
}

impl SharedWatch {
    /// Send the current value as a snapshot, then forward every change.
    pub async fn run(mut self) {
        gauge!(WATCHES_ACTIVE, "kind" => "shared").increment(1.0);
        let key = self.handle.key.clone();
        let token = self.handle.token.clone();

        let mut snapshot = self.observer.current().action;
        snapshot.index = 0;
        if self.outbound.send(snapshot, &token).await {
            debug!(watch_key = %key, "sent initial snapshot");
            loop {
                let next = tokio::select! {
                    () = token.cancelled() => break,
                    next = self.observer.changed() => next,
                };
                let Some(published) = next else { break };
                if !self.watches.is_current(&key, self.handle.id) {
                    break;
                }
                if !published.action.is(self.event_type) {
                    debug!(watch_key = %key, action_type = %published.action.action_type, "discarding foreign action");
                    continue;
                }
                let index = published.action.index;
                if !self.outbound.send(published.action, &token).await {
                    break;
                }
                debug!(watch_key = %key, index, "forwarded");
            }
        }

        let _ = self.watches.remove_if(&key, self.handle.id);
        gauge!(WATCHES_ACTIVE, "kind" => "shared").decrement(1.0);
        debug!(watch_key = %key, "shared watch stopped");
    }
}
