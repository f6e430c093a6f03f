//! Settings type definitions.
//!
//! All types use camelCase field names on disk and implement [`Default`] with
//! production values, so partial JSON files are accepted.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Name of the region created when nothing else is configured.
pub const DEFAULT_REGION: &str = "local";

/// Default Consul agent address.
pub const DEFAULT_CONSUL_ADDRESS: &str = "http://127.0.0.1:8500";

/// Root settings type.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VigilSettings {
    /// HTTP / WebSocket listener.
    pub server: ServerSettings,
    /// Consul regions, keyed by the name used in the `/ws/{region}` path.
    pub regions: BTreeMap<String, RegionSettings>,
    /// Poll and watch timing.
    pub watch: WatchSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl Default for VigilSettings {
    fn default() -> Self {
        let mut regions = BTreeMap::new();
        let _ = regions.insert(DEFAULT_REGION.to_string(), RegionSettings::default());
        Self {
            server: ServerSettings::default(),
            regions,
            watch: WatchSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl VigilSettings {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.regions.is_empty() {
            return Err(SettingsError::InvalidValue("no regions configured".into()));
        }
        for (name, region) in &self.regions {
            if name.is_empty() || name.contains('/') {
                return Err(SettingsError::InvalidValue(format!(
                    "region name {name:?} must be non-empty and contain no '/'"
                )));
            }
            if region.address.is_empty() {
                return Err(SettingsError::InvalidValue(format!(
                    "region {name} has no address"
                )));
            }
        }
        if self.server.outbound_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "outboundQueueCapacity must be at least 1".into(),
            ));
        }
        self.watch.validate()
    }
}

/// Listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Per-connection outbound queue length.
    pub outbound_queue_capacity: usize,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            outbound_queue_capacity: 256,
            max_message_size: 1024 * 1024,
        }
    }
}

/// One Consul region.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegionSettings {
    /// Base URL of the Consul HTTP API.
    pub address: String,
    /// Label shown to clients; defaults to the region name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Datacenter passed as `dc` on every query.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datacenter: Option<String>,
    /// ACL token sent as `X-Consul-Token`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for RegionSettings {
    fn default() -> Self {
        Self {
            address: DEFAULT_CONSUL_ADDRESS.into(),
            label: None,
            datacenter: None,
            token: None,
        }
    }
}

impl RegionSettings {
    /// Label for the directory, falling back to the region name.
    pub fn display_label(&self, name: &str) -> String {
        self.label.clone().unwrap_or_else(|| name.to_string())
    }
}

/// Timing for pollers and per-entity watches, in milliseconds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatchSettings {
    /// Blocking-query wait for single node/service watches.
    pub entity_wait_ms: u64,
    /// Sleep after a failed single-entity query.
    pub error_cooldown_ms: u64,
    /// Minimum spacing between two queries of one entity watch.
    pub publish_floor_ms: u64,
    /// Blocking-query wait for the shared pollers.
    pub poller_wait_ms: u64,
    /// First retry delay after a shared poller error.
    pub poller_backoff_base_ms: u64,
    /// Retry delay cap for shared pollers.
    pub poller_backoff_max_ms: u64,
    /// How long connection teardown waits for its watch tasks.
    pub teardown_timeout_ms: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            entity_wait_ms: 10_000,
            error_cooldown_ms: 10_000,
            publish_floor_ms: 5_000,
            poller_wait_ms: 300_000,
            poller_backoff_base_ms: 1_000,
            poller_backoff_max_ms: 30_000,
            teardown_timeout_ms: 5_000,
        }
    }
}

impl WatchSettings {
    /// Reject timings that would turn a watch or poller into a busy loop.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("entityWaitMs", self.entity_wait_ms),
            ("errorCooldownMs", self.error_cooldown_ms),
            ("publishFloorMs", self.publish_floor_ms),
            ("pollerWaitMs", self.poller_wait_ms),
            ("pollerBackoffBaseMs", self.poller_backoff_base_ms),
            ("pollerBackoffMaxMs", self.poller_backoff_max_ms),
            ("teardownTimeoutMs", self.teardown_timeout_ms),
        ];
        if let Some((key, _)) = required.iter().find(|(_, ms)| *ms == 0) {
            return Err(SettingsError::InvalidValue(format!(
                "watch.{key} must be at least 1"
            )));
        }
        if self.poller_backoff_max_ms < self.poller_backoff_base_ms {
            return Err(SettingsError::InvalidValue(
                "watch.pollerBackoffMaxMs must not be below pollerBackoffBaseMs".into(),
            ));
        }
        Ok(())
    }

    /// [`Self::entity_wait_ms`] as a duration.
    pub fn entity_wait(&self) -> Duration {
        Duration::from_millis(self.entity_wait_ms)
    }

    /// [`Self::error_cooldown_ms`] as a duration.
    pub fn error_cooldown(&self) -> Duration {
        Duration::from_millis(self.error_cooldown_ms)
    }

    /// [`Self::publish_floor_ms`] as a duration.
    pub fn publish_floor(&self) -> Duration {
        Duration::from_millis(self.publish_floor_ms)
    }

    /// [`Self::poller_wait_ms`] as a duration.
    pub fn poller_wait(&self) -> Duration {
        Duration::from_millis(self.poller_wait_ms)
    }

    /// [`Self::poller_backoff_base_ms`] as a duration.
    pub fn poller_backoff_base(&self) -> Duration {
        Duration::from_millis(self.poller_backoff_base_ms)
    }

    /// [`Self::poller_backoff_max_ms`] as a duration.
    pub fn poller_backoff_max(&self) -> Duration {
        Duration::from_millis(self.poller_backoff_max_ms)
    }

    /// [`Self::teardown_timeout_ms`] as a duration.
    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}
