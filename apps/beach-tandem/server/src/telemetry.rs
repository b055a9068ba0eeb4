use anyhow::{Context, Result};
use beach_tandem_core::{ConnectOutcome, DisconnectOutcome, MessageOutcome, RegistrySnapshot};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub struct Telemetry {
    metrics_handle: PrometheusHandle,
}

impl Telemetry {
    /// Installs the global Prometheus recorder and tracing subscriber. Call once.
    pub fn init() -> Result<Self> {
        let metrics_handle = PrometheusBuilder::new()
            .install_recorder()
            .context("failed to install Prometheus metrics recorder")?;

        tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
            .context("failed to initialise tracing subscriber")?;

        Ok(Self { metrics_handle })
    }

    pub fn metrics_handle(&self) -> PrometheusHandle {
        self.metrics_handle.clone()
    }
}

/// A handle backed by a recorder that is never installed, for tests and tools
/// that need an `AppState` without touching global metrics state.
pub fn detached_metrics_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

pub fn record_connect(outcome: &ConnectOutcome) {
    if matches!(outcome, ConnectOutcome::Paired { .. }) {
        counter!("beach_tandem_pairings_total", 1);
    }
}

pub fn record_message(outcome: &MessageOutcome) {
    match outcome {
        MessageOutcome::Relayed { .. } => {
            counter!("beach_tandem_messages_relayed_total", 1);
        }
        MessageOutcome::Dropped(reason) => {
            counter!(
                "beach_tandem_messages_dropped_total",
                1,
                "reason" => reason.as_str()
            );
        }
    }
}

pub fn record_bad_request() {
    counter!(
        "beach_tandem_messages_dropped_total",
        1,
        "reason" => "bad_request"
    );
}

pub fn record_disconnect(outcome: &DisconnectOutcome) {
    if matches!(outcome, DisconnectOutcome::PartnerNotified { .. }) {
        counter!("beach_tandem_partner_disconnects_total", 1);
    }
}

pub fn record_rejected_frame(reason: &'static str) {
    counter!("beach_tandem_frames_rejected_total", 1, "reason" => reason);
}

pub fn record_registry(snapshot: &RegistrySnapshot) {
    gauge!("beach_tandem_waiting", snapshot.waiting as f64);
    gauge!("beach_tandem_paired", snapshot.paired as f64);
}
