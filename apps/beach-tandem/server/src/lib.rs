//! HTTP and WebSocket front end for the Beach Tandem pairing relay.

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::net::TcpListener;

pub mod config;
pub mod gateway;
pub mod ratelimit;
pub mod routes;
pub mod state;
pub mod telemetry;

use crate::state::AppState;

const LIMITER_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Serves the relay on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let pruner = state.index_limiter.spawn_pruner(LIMITER_PRUNE_INTERVAL);
    let app = routes::router(state);

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .context("server shutdown with error");

    pruner.abort();
    result
}
