use std::sync::Arc;

use anyhow::{Context, Result};
use beach_tandem_server::{
    config::{Cli, ServerConfig},
    serve,
    state::AppState,
    telemetry::Telemetry,
};
use clap::Parser;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = Telemetry::init()?;

    let cli = Cli::parse();
    let config = ServerConfig::try_from(cli)?;
    info!(
        listen_addr = %config.listen_addr,
        handshake_timeout_secs = config.handshake_timeout.as_secs(),
        per_connection_buffer = config.per_connection_buffer,
        index_rate_limit = config.index_rate_limit,
        "starting beach-tandem server"
    );

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .context("failed to bind listener")?;
    info!("beach-tandem listening on {}", config.listen_addr);

    let grace = config.shutdown_grace;
    let state = Arc::new(AppState::new(config, telemetry.metrics_handle()));
    serve(listener, state, shutdown_signal()).await?;

    info!(
        grace_seconds = grace.as_secs(),
        "shutdown signal received; sleeping for graceful period"
    );
    tokio::time::sleep(grace).await;
    info!("graceful shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
}
