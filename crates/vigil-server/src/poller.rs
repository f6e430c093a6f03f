//! Shared pollers for the collective resources.
//!
//! One [`SharedPoller`] runs per [`SharedResource`] per region for the
//! region's lifetime. It long-polls the backend and republishes every new
//! version onto the resource's [`MulticastChannel`], so the number of backend
//! queries is independent of how many connections are watching.

use std::sync::Arc;

use metrics::counter;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use vigil_consul::{ConsulBackend, ConsulError, Indexed, QueryOptions};
use vigil_core::{Action, ActionType};

use crate::config::PollerTimings;
use crate::metrics::{POLLER_ERRORS_TOTAL, POLLER_PUBLISHES_TOTAL};
use crate::multicast::MulticastChannel;

/// A resource shared by every connection of a region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SharedResource {
    /// The service catalog.
    Services,
    /// The node catalog.
    Nodes,
}

impl SharedResource {
    /// Every shared resource.
    pub const ALL: [Self; 2] = [Self::Services, Self::Nodes];

    /// Watch key and metric label.
    pub fn key(self) -> &'static str {
        match self {
            Self::Services => "services",
            Self::Nodes => "nodes",
        }
    }

    /// Event type published for this resource.
    pub fn event_type(self) -> ActionType {
        match self {
            Self::Services => ActionType::FetchedServices,
            Self::Nodes => ActionType::FetchedNodes,
        }
    }

    /// Payload cached before the first successful query.
    pub fn empty_payload(self) -> Value {
        match self {
            Self::Services => json!({}),
            Self::Nodes => json!([]),
        }
    }

    /// Initial channel value: the empty payload at index 0.
    pub fn initial_action(self) -> Action {
        Action::new(self.event_type(), self.empty_payload(), 0)
    }

    /// Issue this resource's blocking query.
    pub async fn query(
        self,
        backend: &dyn ConsulBackend,
        opts: QueryOptions,
    ) -> Result<Indexed<Value>, ConsulError> {
        match self {
            Self::Services => backend.services(opts).await,
            Self::Nodes => backend.nodes(opts).await,
        }
    }
}

/// Long-polls one shared resource and republishes new versions.
pub struct SharedPoller {
    region: String,
    resource: SharedResource,
    backend: Arc<dyn ConsulBackend>,
    channel: Arc<MulticastChannel>,
    timings: PollerTimings,
}

impl SharedPoller {
    /// Create a poller publishing onto `channel`.
    pub fn new(
        region: impl Into<String>,
        resource: SharedResource,
        backend: Arc<dyn ConsulBackend>,
        channel: Arc<MulticastChannel>,
        timings: PollerTimings,
    ) -> Self {
        Self {
            region: region.into(),
            resource,
            backend,
            channel,
            timings,
        }
    }

    /// Poll until `shutdown` fires.
    #[instrument(skip_all, fields(region = %self.region, resource = self.resource.key()))]
    pub async fn run(self, shutdown: CancellationToken) {
        let mut last_index = 0u64;
        let mut failures = 0u32;
        info!("shared poller started");

        loop {
            let opts = QueryOptions::blocking(last_index, self.timings.wait);
            let result = tokio::select! {
                () = shutdown.cancelled() => break,
                result = self.resource.query(self.backend.as_ref(), opts) => result,
            };

            match result {
                Ok(Indexed { value, last_index: index }) => {
                    failures = 0;
                    // a zero index would turn the next query into a busy loop
                    let index = index.max(1);
                    if index < last_index {
                        debug!(index, last_index, "index went backwards, resetting");
                    } else if index == last_index {
                        continue;
                    }
                    last_index = index;
                    let version = self
                        .channel
                        .publish(Action::new(self.resource.event_type(), value, index));
                    counter!(POLLER_PUBLISHES_TOTAL, "region" => self.region.clone(), "resource" => self.resource.key())
                        .increment(1);
                    debug!(index, version, "published");
                }
                Err(e) => {
                    let delay = self.timings.backoff.delay(failures, rand::random::<f64>());
                    failures = failures.saturating_add(1);
                    counter!(POLLER_ERRORS_TOTAL, "region" => self.region.clone(), "resource" => self.resource.key())
                        .increment(1);
                    warn!(error = %e, attempt = failures, delay_ms = delay.as_millis(), "query failed, backing off");
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!("shared poller stopped");
    }
}
