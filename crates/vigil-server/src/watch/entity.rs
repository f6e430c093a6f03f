//! Dedicated long-poll loop for a single service or node.
//!
//! Unlike the collective resources, single entities are not shared between
//! connections: every `watchService`/`watchNode` gets its own loop.

use std::fmt;
use std::sync::Arc;

use metrics::{counter, gauge};
use serde_json::Value;
use tracing::{debug, warn};
use vigil_consul::{ConsulBackend, ConsulError, Indexed, QueryOptions};
use vigil_core::{Action, ActionType};

use super::sleep_or_cancel;
use crate::config::WatchTimings;
use crate::metrics::{ENTITY_ERRORS_TOTAL, ENTITY_PUBLISHES_TOTAL, WATCHES_ACTIVE};
use crate::watch_set::{WatchHandle, WatchSet};
use crate::websocket::connection::Outbound;

/// Smallest valid index; the first query returns immediately against any real
/// Consul resource.
const INITIAL_INDEX: u64 = 1;

/// Kind of single entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// One service's health entries.
    Service,
    /// One node's health checks.
    Node,
}

impl EntityKind {
    /// Label used in watch keys, metrics and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Service => "service",
            Self::Node => "node",
        }
    }

    /// Event type published for this kind.
    pub fn event_type(self) -> ActionType {
        match self {
            Self::Service => ActionType::FetchedService,
            Self::Node => ActionType::FetchedNode,
        }
    }

    /// Watch-set key for entity `id`.
    ///
    /// Keys are namespaced so that a service and a node sharing a name, or an
    /// entity named like a collective resource, never collide.
    pub fn watch_key(self, id: &str) -> String {
        format!("{}:{id}", self.as_str())
    }

    /// Issue this kind's blocking query for `id`.
    pub async fn query(
        self,
        backend: &dyn ConsulBackend,
        id: &str,
        opts: QueryOptions,
    ) -> Result<Indexed<Value>, ConsulError> {
        match self {
            Self::Service => backend.service(id, opts).await,
            Self::Node => backend.node(id, opts).await,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A connection's dedicated watch on one entity.
pub struct EntityWatch {
    /// Service or node.
    pub kind: EntityKind,
    /// Entity id as sent by the client.
    pub entity_id: String,
    /// Region backend to query.
    pub backend: Arc<dyn ConsulBackend>,
    /// Wait, cooldown and floor durations.
    pub timings: WatchTimings,
    /// Registration in the connection's watch set.
    pub handle: WatchHandle,
    /// The connection's watch set.
    pub watches: Arc<WatchSet>,
    /// The connection's outbound queue.
    pub outbound: Outbound,
}

impl EntityWatch {
    /// Poll until unwatched, torn down, or the outbound queue closes.
    ///
    /// Publishes only when the backend index is strictly greater than the last
    /// one seen, and sleeps the publish floor after every successful query.
    pub async fn run(self) {
        let kind = self.kind.as_str();
        let key = self.handle.key.clone();
        let token = self.handle.token.clone();
        let mut index = INITIAL_INDEX;
        gauge!(WATCHES_ACTIVE, "kind" => kind).increment(1.0);
        debug!(watch_key = %key, "entity watch started");

        loop {
            let opts = QueryOptions::blocking(index, self.timings.entity_wait);
            let result = tokio::select! {
                () = token.cancelled() => break,
                result = self.kind.query(self.backend.as_ref(), &self.entity_id, opts) => result,
            };

            let Indexed { value, last_index } = match result {
                Ok(indexed) => indexed,
                Err(e) => {
                    counter!(ENTITY_ERRORS_TOTAL, "kind" => kind).increment(1);
                    warn!(watch_key = %key, error = %e, "query failed, cooling down");
                    if !sleep_or_cancel(self.timings.error_cooldown, &token).await {
                        break;
                    }
                    continue;
                }
            };

            if !self.watches.is_current(&key, self.handle.id) {
                break;
            }

            if last_index > index {
                index = last_index;
                let action = Action::new(self.kind.event_type(), value, index);
                if !self.outbound.send(action, &token).await {
                    break;
                }
                counter!(ENTITY_PUBLISHES_TOTAL, "kind" => kind).increment(1);
                debug!(watch_key = %key, index, "published");
            }

            if !sleep_or_cancel(self.timings.publish_floor, &token).await {
                break;
            }
        }

        let _ = self.watches.remove_if(&key, self.handle.id);
        gauge!(WATCHES_ACTIVE, "kind" => kind).decrement(1.0);
        debug!(watch_key = %key, "entity watch stopped");
    }
}
