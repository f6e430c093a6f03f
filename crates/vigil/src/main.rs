//! # vigil
//!
//! Vigil relay binary. Loads settings, starts one pair of shared pollers per
//! region and serves the dashboard WebSocket until interrupted.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use vigil_core::logging::{LogFormat, init_subscriber, with_bootstrap_subscriber};
use vigil_server::config::ServerConfig;
use vigil_server::region::Regions;
use vigil_server::server::VigilServer;
use vigil_settings::VigilSettings;

/// Vigil Consul relay.
#[derive(Parser, Debug)]
#[command(name = "vigil", about = "Relay Consul catalog changes to dashboards over WebSocket")]
struct Cli {
    /// Settings file (defaults to `$VIGIL_CONFIG` or `~/.vigil/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings, 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Log level or filter directive (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    /// Apply flag overrides on top of loaded settings.
    fn apply(&self, settings: &mut VigilSettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.json_logs {
            settings.logging.json = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = with_bootstrap_subscriber(|| {
        vigil_settings::load_settings(cli.config.as_deref())
    })
    .context("Failed to load settings")?;
    cli.apply(&mut settings);

    let format = if settings.logging.json {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };
    init_subscriber(&settings.logging.level, format);

    let metrics = vigil_server::metrics::install_recorder().context("Failed to install metrics")?;
    let regions = Regions::from_settings(&settings).context("Failed to configure regions")?;
    let config = ServerConfig::from(&settings);
    let teardown = config.watch.teardown_timeout;

    let _ = regions.reachable_datacenters().await;

    let server = VigilServer::new(config, regions, Some(metrics));
    let mut handles = server.start_pollers();
    let _ = server.publish_directory().await;

    let (addr, server_handle) = server.listen().await.context("Failed to start server")?;
    handles.push(server_handle);
    tracing::info!(
        %addr,
        regions = ?server.regions().names(),
        "vigil ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    tracing::info!("shutdown signal received");

    server
        .graceful_shutdown(handles, Some(teardown.saturating_mul(2)))
        .await;
    tracing::info!("vigil stopped");
    Ok(())
}
