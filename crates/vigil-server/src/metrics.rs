//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::ServerError;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter, labels: region).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter, labels: region).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket connection duration seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Failed outbound frame writes (counter).
pub const WS_WRITE_ERRORS_TOTAL: &str = "ws_write_errors_total";
/// Directory broadcasts dropped on full or closed queues (counter).
pub const WS_BROADCAST_DROPS_TOTAL: &str = "ws_broadcast_drops_total";
/// Inbound messages ignored as unknown or malformed (counter).
pub const WS_IGNORED_MESSAGES_TOTAL: &str = "ws_ignored_messages_total";
/// Active watch loops (gauge, labels: kind).
pub const WATCHES_ACTIVE: &str = "watches_active";
/// Shared poller publishes (counter, labels: region, resource).
pub const POLLER_PUBLISHES_TOTAL: &str = "poller_publishes_total";
/// Shared poller query errors (counter, labels: region, resource).
pub const POLLER_ERRORS_TOTAL: &str = "poller_errors_total";
/// Per-entity publishes (counter, labels: kind).
pub const ENTITY_PUBLISHES_TOTAL: &str = "entity_publishes_total";
/// Per-entity query errors (counter, labels: kind).
pub const ENTITY_ERRORS_TOTAL: &str = "entity_errors_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_and_render() {
        // Build a recorder + handle without a global install to avoid test conflicts.
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            WS_CONNECTIONS_TOTAL,
            WS_DISCONNECTIONS_TOTAL,
            WS_CONNECTIONS_ACTIVE,
            WS_CONNECTION_DURATION_SECONDS,
            WS_WRITE_ERRORS_TOTAL,
            WS_BROADCAST_DROPS_TOTAL,
            WS_IGNORED_MESSAGES_TOTAL,
            WATCHES_ACTIVE,
            POLLER_PUBLISHES_TOTAL,
            POLLER_ERRORS_TOTAL,
            ENTITY_PUBLISHES_TOTAL,
            ENTITY_ERRORS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name '{name}' must be snake_case"
            );
        }
    }
}
