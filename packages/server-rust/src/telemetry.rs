//! Process-wide tracing and metrics setup. Called once from the binary.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` wins over `default_level`. Safe to call more than once;
/// later calls are no-ops.
pub fn init(default_level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = if json {
        builder
            .json()
            .with_current_span(false)
            .with_target(true)
            .try_init()
    } else {
        builder.with_target(true).try_init()
    };
}

/// Starts the Prometheus scrape endpoint and installs it as the `metrics`
/// recorder.
///
/// # Errors
///
/// Returns an error if the listener cannot be set up or a recorder is
/// already installed.
pub fn install_metrics_exporter(addr: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(%addr, "prometheus exporter listening");
    Ok(())
}
