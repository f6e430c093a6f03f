//! # vigil-server
//!
//! Axum `WebSocket` relay between browser dashboards and Consul.
//!
//! - Per region, one shared poller per collection (services, nodes) publishing
//!   into a [`multicast::MulticastChannel`]
//! - Per connection, a [`watch_set::WatchSet`] of cancellable watches: shared
//!   watches forward multicast snapshots, entity watches run their own
//!   blocking-query loop
//! - [`registry::Registry`] of live connections and the region directory
//! - HTTP endpoints: `/ws/{region}`, `/health`, `/metrics`
//! - Graceful shutdown through a root `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod multicast;
pub mod poller;
pub mod region;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod watch;
pub mod watch_set;
pub mod websocket;

pub use config::ServerConfig;
pub use errors::{ServerError, TransportError};
pub use region::{Region, Regions};
pub use registry::Registry;
pub use server::VigilServer;
pub use shutdown::ShutdownCoordinator;
