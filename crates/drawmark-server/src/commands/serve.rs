//! Serve command handler

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;

use drawmark_core::Config;
use drawmark_server::{app, AppState};

use crate::output::Output;

/// Run the HTTP server until interrupted
pub async fn serve(config: Config, bind: Option<String>, output: &Output) -> Result<()> {
    let bind_addr = bind.unwrap_or_else(|| config.bind_addr.clone());
    let state = AppState::new(config)?;

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    let local_addr = listener.local_addr().context("Failed to read listener address")?;

    info!("Listening on {}", local_addr);
    output.message(&format!("Drawmark listening on http://{}", local_addr));

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
