//! In-memory backend with Consul's blocking-query semantics.
//!
//! Each resource holds an [`Indexed`] value behind a `tokio::sync::watch`
//! channel. A query with `wait_index > 0` blocks until the stored index moves
//! past it or the wait elapses, exactly like a Consul agent would. Queries are
//! counted per resource key (`services`, `nodes`, `service:<id>`, `node:<id>`)
//! so tests can assert how often the backend was hit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::watch;

use crate::backend::{ConsulBackend, Indexed, QueryOptions};
use crate::errors::ConsulError;

/// Wait used when a query does not bound its own.
const DEFAULT_WAIT: Duration = Duration::from_secs(300);

/// Resource key for the service catalog.
pub const SERVICES_KEY: &str = "services";
/// Resource key for the node catalog.
pub const NODES_KEY: &str = "nodes";
/// Key for the datacenter listing.
pub const DATACENTERS_KEY: &str = "datacenters";

/// Resource key for one service.
pub fn service_key(id: &str) -> String {
    format!("service:{id}")
}

/// Resource key for one node.
pub fn node_key(id: &str) -> String {
    format!("node:{id}")
}

/// Scriptable in-memory [`ConsulBackend`].
pub struct MockBackend {
    resources: Mutex<HashMap<String, watch::Sender<Indexed<Value>>>>,
    queries: Mutex<HashMap<String, usize>>,
    failures: Mutex<HashMap<String, usize>>,
    datacenters: Mutex<Vec<String>>,
    blocking: AtomicBool,
}

impl MockBackend {
    /// Empty backend: every resource starts at index 1.
    pub fn new() -> Self {
        Self {
            resources: Mutex::new(HashMap::new()),
            queries: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            datacenters: Mutex::new(vec!["dc1".to_string()]),
            blocking: AtomicBool::new(true),
        }
    }

    fn initial(key: &str) -> Indexed<Value> {
        let value = if key == SERVICES_KEY { json!({}) } else { json!([]) };
        Indexed {
            value,
            last_index: 1,
        }
    }

    fn sender(&self, key: &str) -> watch::Sender<Indexed<Value>> {
        let mut resources = self.resources.lock();
        resources
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(Self::initial(key)).0)
            .clone()
    }

    /// Store a new value for `key`, waking blocked queries if the index advanced.
    pub fn set(&self, key: &str, value: Value, index: u64) {
        let _ = self.sender(key).send_replace(Indexed {
            value,
            last_index: index,
        });
    }

    /// Store the service catalog.
    pub fn set_services(&self, value: Value, index: u64) {
        self.set(SERVICES_KEY, value, index);
    }

    /// Store the node catalog.
    pub fn set_nodes(&self, value: Value, index: u64) {
        self.set(NODES_KEY, value, index);
    }

    /// Store one service's health entries.
    pub fn set_service(&self, id: &str, value: Value, index: u64) {
        self.set(&service_key(id), value, index);
    }

    /// Store one node's health checks.
    pub fn set_node(&self, id: &str, value: Value, index: u64) {
        self.set(&node_key(id), value, index);
    }

    /// Replace the datacenter list.
    pub fn set_datacenters(&self, datacenters: Vec<String>) {
        *self.datacenters.lock() = datacenters;
    }

    /// Make the next `count` queries of `key` fail.
    pub fn fail_next(&self, key: &str, count: usize) {
        let _ = self.failures.lock().insert(key.to_string(), count);
    }

    /// When disabled, queries return the current value immediately.
    pub fn set_blocking(&self, blocking: bool) {
        self.blocking.store(blocking, Ordering::SeqCst);
    }

    /// Number of queries issued against `key`.
    pub fn queries(&self, key: &str) -> usize {
        self.queries.lock().get(key).copied().unwrap_or(0)
    }

    /// Number of queries issued against any resource.
    pub fn total_queries(&self) -> usize {
        self.queries.lock().values().sum()
    }

    fn take_failure(&self, key: &str) -> Option<ConsulError> {
        let mut failures = self.failures.lock();
        let remaining = failures.get_mut(key)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(ConsulError::Unavailable(format!("scripted failure for {key}")))
    }

    async fn query(&self, key: &str, opts: QueryOptions) -> Result<Indexed<Value>, ConsulError> {
        *self.queries.lock().entry(key.to_string()).or_insert(0) += 1;
        if let Some(err) = self.take_failure(key) {
            return Err(err);
        }

        let mut rx = self.sender(key).subscribe();
        if opts.wait_index > 0 && self.blocking.load(Ordering::SeqCst) {
            let wait = opts.wait_time.unwrap_or(DEFAULT_WAIT);
            let target = opts.wait_index;
            let _ = tokio::time::timeout(wait, rx.wait_for(|v| v.last_index > target)).await;
        }
        let current = rx.borrow().clone();
        Ok(current)
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConsulBackend for MockBackend {
    async fn services(&self, opts: QueryOptions) -> Result<Indexed<Value>, ConsulError> {
        self.query(SERVICES_KEY, opts).await
    }

    async fn nodes(&self, opts: QueryOptions) -> Result<Indexed<Value>, ConsulError> {
        self.query(NODES_KEY, opts).await
    }

    async fn service(&self, id: &str, opts: QueryOptions) -> Result<Indexed<Value>, ConsulError> {
        self.query(&service_key(id), opts).await
    }

    async fn node(&self, id: &str, opts: QueryOptions) -> Result<Indexed<Value>, ConsulError> {
        self.query(&node_key(id), opts).await
    }

    async fn datacenters(&self) -> Result<Vec<String>, ConsulError> {
        *self.queries.lock().entry(DATACENTERS_KEY.to_string()).or_insert(0) += 1;
        if let Some(err) = self.take_failure(DATACENTERS_KEY) {
            return Err(err);
        }
        Ok(self.datacenters.lock().clone())
    }
}
