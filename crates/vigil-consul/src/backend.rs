//! The backend query interface.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::ConsulError;

/// Resume marker and wait bound for a blocking query.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueryOptions {
    /// Block until the resource's index exceeds this value. `0` returns immediately.
    pub wait_index: u64,
    /// Upper bound on how long the backend may block. `None` uses the backend default.
    pub wait_time: Option<Duration>,
}

impl QueryOptions {
    /// Options resuming from `wait_index`, blocking at most `wait_time`.
    pub fn blocking(wait_index: u64, wait_time: Duration) -> Self {
        Self {
            wait_index,
            wait_time: Some(wait_time),
        }
    }
}

/// A query result together with the backend's version marker.
#[derive(Clone, Debug, PartialEq)]
pub struct Indexed<T> {
    /// Current value of the resource.
    pub value: T,
    /// Version marker (`X-Consul-Index`) at the time of capture.
    pub last_index: u64,
}

/// Blocking queries against one Consul datacenter.
#[async_trait]
pub trait ConsulBackend: Send + Sync {
    /// All services in the catalog.
    async fn services(&self, opts: QueryOptions) -> Result<Indexed<Value>, ConsulError>;

    /// All nodes in the catalog.
    async fn nodes(&self, opts: QueryOptions) -> Result<Indexed<Value>, ConsulError>;

    /// Health entries for one service.
    async fn service(&self, id: &str, opts: QueryOptions) -> Result<Indexed<Value>, ConsulError>;

    /// Health checks for one node.
    async fn node(&self, id: &str, opts: QueryOptions) -> Result<Indexed<Value>, ConsulError>;

    /// Datacenters known to the agent.
    async fn datacenters(&self) -> Result<Vec<String>, ConsulError>;
}
