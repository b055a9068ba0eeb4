use std::{sync::Arc, time::Instant};

use beach_tandem_core::{PairingEngine, Registry};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use crate::{config::ServerConfig, gateway::SocketTransport, ratelimit::RateLimiter};

pub struct AppState {
    pub config: ServerConfig,
    pub engine: PairingEngine<SocketTransport>,
    pub index_limiter: Arc<RateLimiter>,
    metrics: PrometheusHandle,
    started: Instant,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub waiting: usize,
    pub paired: usize,
    pub known_keys: usize,
    pub open_sockets: usize,
    pub uptime_secs: u64,
}

impl AppState {
    pub fn new(config: ServerConfig, metrics: PrometheusHandle) -> Self {
        let engine = PairingEngine::new(
            Arc::new(Registry::new()),
            Arc::new(SocketTransport::new()),
        );
        let index_limiter = Arc::new(RateLimiter::new(
            config.index_rate_limit,
            config.index_rate_window,
        ));
        Self {
            config,
            engine,
            index_limiter,
            metrics,
            started: Instant::now(),
        }
    }

    pub fn transport(&self) -> &SocketTransport {
        self.engine.transport()
    }

    pub fn stats(&self) -> StatsResponse {
        let snapshot = self.engine.registry().snapshot();
        StatsResponse {
            waiting: snapshot.waiting,
            paired: snapshot.paired,
            known_keys: snapshot.known_keys,
            open_sockets: self.transport().len(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    pub fn render_metrics(&self) -> String {
        self.metrics.render()
    }
}
