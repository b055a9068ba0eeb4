use std::{net::SocketAddr, sync::Arc, time::Instant};

use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use metrics::counter;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::debug;

use crate::{gateway::ws_handler, ratelimit::client_ip, state::AppState};

const INDEX_HTML: &str = include_str!("../static/index.html");

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/debug/stats", get(stats_handler))
        .route("/ws", get(ws_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn index_handler(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    let ip = client_ip(&headers, peer);
    if !state.index_limiter.check(ip, Instant::now()) {
        counter!("beach_tandem_index_rate_limited_total", 1);
        debug!(client_ip = %ip, "index request rate limited");
        return StatusCode::TOO_MANY_REQUESTS.into_response();
    }
    Html(INDEX_HTML).into_response()
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.stats())
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = state.render_metrics();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}
