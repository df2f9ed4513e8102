//! clawdeck: web admin console backend for a remote OpenClaw gateway.
//!
//! Every endpoint opens a fresh SSH connection to the gateway host, runs one
//! command and maps the output to JSON.

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod history;
pub mod ssh;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub use api::{create_router, AppState};
pub use config::Settings;

/// Bind the listener and serve the API until Ctrl-C.
pub async fn serve(settings: Settings) -> anyhow::Result<()> {
    let bind = settings.bind;
    let state = AppState::new(settings);
    match state.settings.ssh.as_ref() {
        Some(ssh) => info!(host = %ssh.host, port = ?ssh.port, user = ?ssh.username, "remote gateway configured"),
        None => warn!("no SSH host configured, API calls will return 'SSH not configured'"),
    }

    let app = create_router(state);
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(addr = %bind, "clawdeck listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("clawdeck stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
