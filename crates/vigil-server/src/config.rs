//! Server configuration.

use std::time::Duration;

use vigil_core::retry::Backoff;
use vigil_settings::VigilSettings;

/// Timings for the watch loops a connection spawns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WatchTimings {
    /// Bounded wait for per-entity blocking queries.
    pub entity_wait: Duration,
    /// Sleep after a failed per-entity query.
    pub error_cooldown: Duration,
    /// Minimum spacing between per-entity queries after a success.
    pub publish_floor: Duration,
    /// How long teardown waits for a connection's tasks to stop.
    pub teardown_timeout: Duration,
}

impl Default for WatchTimings {
    fn default() -> Self {
        Self {
            entity_wait: Duration::from_secs(10),
            error_cooldown: Duration::from_secs(10),
            publish_floor: Duration::from_secs(5),
            teardown_timeout: Duration::from_secs(5),
        }
    }
}

/// Timings for the shared pollers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PollerTimings {
    /// Bounded wait for each blocking query.
    pub wait: Duration,
    /// Retry policy after a failed query.
    pub backoff: Backoff,
}

impl Default for PollerTimings {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(300),
            backoff: Backoff::new(Duration::from_secs(1), Duration::from_secs(30)),
        }
    }
}

/// Configuration for the Vigil server.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (`0` for auto-assign).
    pub port: u16,
    /// Capacity of each connection's outbound queue.
    pub outbound_queue_capacity: usize,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Per-connection watch timings.
    pub watch: WatchTimings,
    /// Shared poller timings.
    pub poller: PollerTimings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
            outbound_queue_capacity: 256,
            max_message_size: 1024 * 1024, // 1 MiB
            watch: WatchTimings::default(),
            poller: PollerTimings::default(),
        }
    }
}

impl From<&VigilSettings> for ServerConfig {
    fn from(settings: &VigilSettings) -> Self {
        let watch = &settings.watch;
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            outbound_queue_capacity: settings.server.outbound_queue_capacity,
            max_message_size: settings.server.max_message_size,
            watch: WatchTimings {
                entity_wait: watch.entity_wait(),
                error_cooldown: watch.error_cooldown(),
                publish_floor: watch.publish_floor(),
                teardown_timeout: watch.teardown_timeout(),
            },
            poller: PollerTimings {
                wait: watch.poller_wait(),
                backoff: Backoff::new(watch.poller_backoff_base(), watch.poller_backoff_max()),
            },
        }
    }
}

impl ServerConfig {
    /// `host:port` bind address.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
