//! `VigilServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::region::Regions;
use crate::registry::Registry;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::connection::ConnectionContext;
use crate::websocket::session::run_ws_session;

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Configured regions.
    pub regions: Arc<Regions>,
    /// Live connections and the region directory.
    pub registry: Arc<Registry>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// Tracks running sessions.
    pub sessions: TaskTracker,
    /// When the server started.
    pub start_time: Instant,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
}

/// The Vigil relay server.
pub struct VigilServer {
    state: AppState,
}

impl VigilServer {
    /// Create a new server.
    pub fn new(config: ServerConfig, regions: Regions, metrics: Option<PrometheusHandle>) -> Self {
        Self {
            state: AppState {
                config: Arc::new(config),
                regions: Arc::new(regions),
                registry: Arc::new(Registry::new()),
                shutdown: Arc::new(ShutdownCoordinator::new()),
                sessions: TaskTracker::new(),
                start_time: Instant::now(),
                metrics,
            },
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws/{region}", get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Start every region's shared pollers.
    pub fn start_pollers(&self) -> Vec<JoinHandle<()>> {
        self.state
            .regions
            .start_pollers(self.state.config.poller, &self.state.shutdown.token())
    }

    /// Publish the region directory to the registry.
    pub async fn publish_directory(&self) -> bool {
        self.state
            .registry
            .set_directory(self.state.regions.directory())
            .await
    }

    /// Bind the listener and serve until shutdown.
    ///
    /// Returns the bound address and the serving task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let address = self.state.config.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| ServerError::Bind {
                address: address.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let router = self.router();
        let token = self.state.shutdown.token();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
            {
                error!(error = %e, "server stopped with error");
            }
        });

        info!(addr = %local_addr, regions = self.state.regions.len(), "vigil listening");
        Ok((local_addr, handle))
    }

    /// Cancel everything and wait for sessions and `handles` to finish.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        self.state
            .shutdown
            .graceful_shutdown(&self.state.registry, &self.state.sessions, handles, timeout)
            .await;
    }

    /// Get the registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.state.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Get the configured regions.
    pub fn regions(&self) -> &Arc<Regions> {
        &self.state.regions
    }

    /// Running sessions.
    pub fn sessions(&self) -> &TaskTracker {
        &self.state.sessions
    }
}

/// GET /ws/{region}
async fn ws_handler(
    Path(region): Path<String>,
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Some(region) = state.regions.get(&region).cloned() else {
        debug!(region, "unknown region");
        return (StatusCode::NOT_FOUND, "unknown region").into_response();
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let ctx = ConnectionContext {
        region,
        registry: state.registry.clone(),
        timings: state.config.watch,
        shutdown: state.shutdown.token(),
    };
    let capacity = state.config.outbound_queue_capacity;
    let sessions = state.sessions.clone();
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| sessions.track_future(run_ws_session(socket, ctx, capacity)))
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.registry.connection_count().await;
    Json(health::health_check(
        state.start_time,
        connections,
        state.regions.names(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
