//! Regions: one Consul backend plus its shared channels.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vigil_consul::{ConsulBackend, HttpConsulBackend};
use vigil_settings::{RegionSettings, VigilSettings};

use crate::config::PollerTimings;
use crate::errors::ServerError;
use crate::multicast::MulticastChannel;
use crate::poller::{SharedPoller, SharedResource};

/// One Consul datacenter served under `/ws/{name}`.
pub struct Region {
    name: String,
    label: String,
    backend: Arc<dyn ConsulBackend>,
    services: Arc<MulticastChannel>,
    nodes: Arc<MulticastChannel>,
}

impl Region {
    /// Create a region whose channels hold the empty payloads at index 0.
    pub fn new(
        name: impl Into<String>,
        label: impl Into<String>,
        backend: Arc<dyn ConsulBackend>,
    ) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            backend,
            services: Arc::new(MulticastChannel::new(
                SharedResource::Services.initial_action(),
            )),
            nodes: Arc::new(MulticastChannel::new(SharedResource::Nodes.initial_action())),
        }
    }

    /// Create a region backed by the Consul HTTP API.
    pub fn from_settings(name: &str, settings: &RegionSettings) -> Result<Self, ServerError> {
        let backend = HttpConsulBackend::new(
            &settings.address,
            settings.datacenter.clone(),
            settings.token.clone(),
        )
        .map_err(|source| ServerError::Region {
            region: name.to_string(),
            source,
        })?;
        Ok(Self::new(name, settings.display_label(name), Arc::new(backend)))
    }

    /// Region name, as used in the WebSocket path.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Human-readable label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Backend client.
    pub fn backend(&self) -> &Arc<dyn ConsulBackend> {
        &self.backend
    }

    /// Channel for a shared resource.
    pub fn channel(&self, resource: SharedResource) -> &Arc<MulticastChannel> {
        match resource {
            SharedResource::Services => &self.services,
            SharedResource::Nodes => &self.nodes,
        }
    }

    /// Spawn one poller per shared resource, stopping when `shutdown` fires.
    pub fn start_pollers(
        &self,
        timings: PollerTimings,
        shutdown: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        SharedResource::ALL
            .into_iter()
            .map(|resource| {
                let poller = SharedPoller::new(
                    self.name.clone(),
                    resource,
                    self.backend.clone(),
                    self.channel(resource).clone(),
                    timings,
                );
                tokio::spawn(poller.run(shutdown.clone()))
            })
            .collect()
    }
}

/// All configured regions, by name.
#[derive(Default)]
pub struct Regions {
    map: BTreeMap<String, Arc<Region>>,
}

impl Regions {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build HTTP-backed regions from settings.
    pub fn from_settings(settings: &VigilSettings) -> Result<Self, ServerError> {
        let mut regions = Self::new();
        for (name, region) in &settings.regions {
            regions.insert(Region::from_settings(name, region)?);
            info!(region = %name, address = %region.address, "region configured");
        }
        Ok(regions)
    }

    /// Add or replace a region.
    pub fn insert(&mut self, region: Region) {
        let _ = self.map.insert(region.name.clone(), Arc::new(region));
    }

    /// Look up a region by name.
    pub fn get(&self, name: &str) -> Option<&Arc<Region>> {
        self.map.get(name)
    }

    /// Region names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.map.keys().cloned().collect()
    }

    /// Number of regions.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether no region is configured.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Region name → label, as sent in `fetchedRegions`.
    pub fn directory(&self) -> BTreeMap<String, String> {
        self.map
            .values()
            .map(|r| (r.name.clone(), r.label.clone()))
            .collect()
    }

    /// Ask every region's agent for its datacenters.
    ///
    /// Unreachable regions are logged and left out; their pollers keep retrying.
    pub async fn reachable_datacenters(&self) -> BTreeMap<String, Vec<String>> {
        let mut reachable = BTreeMap::new();
        for (name, region) in &self.map {
            match region.backend.datacenters().await {
                Ok(datacenters) => {
                    info!(region = %name, ?datacenters, "consul reachable");
                    let _ = reachable.insert(name.clone(), datacenters);
                }
                Err(e) => warn!(region = %name, error = %e, "consul unreachable at startup"),
            }
        }
        reachable
    }

    /// Start the pollers of every region.
    pub fn start_pollers(
        &self,
        timings: PollerTimings,
        shutdown: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        self.map
            .values()
            .flat_map(|r| r.start_pollers(timings, shutdown))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use vigil_consul::MockBackend;
    use vigil_core::ActionType;

    #[test]
    fn channels_start_empty() {
        let region = Region::new("local", "Local", Arc::new(MockBackend::new()));
        let services = region.channel(SharedResource::Services).latest();
        assert!(services.action.is(ActionType::FetchedServices));
        assert_eq!(services.action.payload, json!({}));
        assert_eq!(services.action.index, 0);
        let nodes = region.channel(SharedResource::Nodes).latest();
        assert_eq!(nodes.action.payload, json!([]));
    }

    #[test]
    fn from_settings_builds_http_regions() {
        let mut settings = VigilSettings::default();
        let _ = settings.regions.insert(
            "eu".into(),
            RegionSettings {
                address: "http://consul.eu:8500".into(),
                label: Some("Europe".into()),
                ..RegionSettings::default()
            },
        );
        let regions = Regions::from_settings(&settings).unwrap();
        assert_eq!(regions.len(), 2);
        assert_eq!(regions.names(), vec!["eu".to_string(), "local".to_string()]);
        assert_eq!(regions.directory()["eu"], "Europe");
        assert_eq!(regions.directory()["local"], "local");
        assert_eq!(regions.get("eu").unwrap().label(), "Europe");
    }

    #[test]
    fn invalid_address_names_region() {
        let settings = RegionSettings {
            address: "::not a url::".into(),
            ..RegionSettings::default()
        };
        let err = Region::from_settings("broken", &settings).err().unwrap();
        assert!(matches!(err, ServerError::Region { ref region, .. } if region == "broken"));
    }

    #[tokio::test]
    async fn reachable_datacenters_skips_failing_regions() {
        let up = Arc::new(MockBackend::new());
        up.set_datacenters(vec!["eu-west".into()]);
        let down = Arc::new(MockBackend::new());
        down.fail_next(vigil_consul::mock::DATACENTERS_KEY, 1);

        let mut regions = Regions::new();
        regions.insert(Region::new("eu", "Europe", up));
        regions.insert(Region::new("us", "US", down));

        let reachable = regions.reachable_datacenters().await;
        assert_eq!(reachable.len(), 1);
        assert_eq!(reachable["eu"], vec!["eu-west".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn pollers_feed_both_channels() {
        let backend = Arc::new(MockBackend::new());
        backend.set_services(json!({"web": []}), 10);
        backend.set_nodes(json!([{"Node": "n1"}]), 11);
        let region = Region::new("local", "local", backend);
        let token = CancellationToken::new();
        let handles = region.start_pollers(crate::config::PollerTimings::default(), &token);
        assert_eq!(handles.len(), 2);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(region.channel(SharedResource::Services).latest().action.index, 10);
        assert_eq!(region.channel(SharedResource::Nodes).latest().action.index, 11);

        token.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }
}
