//! # geofencing-server
//!
//! HTTP server for the beacon geofencing service.
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package geofencing-server
//!
//! # Production
//! GEOFENCING_ENV=production ./geofencing-server
//! ```
//!
//! The configuration file is `/etc/geofencing/config.toml` on Linux unless
//! `GEOFENCING_CONFIG` points elsewhere. Values can be overridden with
//! `GEOFENCING__<SECTION>__<KEY>` environment variables.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;

use anyhow::Context;
use geofencing_core::Config;
use geofencing_server::api::create_router;
use geofencing_server::logging;
use geofencing_server::state::AppState;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init(logging::is_production())?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting geofencing-server");

    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(path) = config.source() {
        info!(path = %path.display(), "Loaded configuration");
    }
    let system_uuid = config.ensure_system_uuid()?;
    info!(%system_uuid, "Beacon namespace");

    if config.server.require_admin_secret().is_err() {
        tracing::warn!("server.admin_secret is not set, administration is disabled");
    }
    if let Err(e) = config.mail.validate() {
        tracing::warn!(error = %e, "Mail opt-in is not configured, mail events will be discarded");
    }

    let addr: SocketAddr = format!("{}:{}", config.server.bind_address, config.server.port)
        .parse()
        .context("Invalid bind address")?;

    let state = AppState::from_config(config)?;
    let app = create_router(state.clone());

    let listener = TcpListener::bind(addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.engine().stop().await;
    info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
