//! Rill server binary.

use std::sync::Arc;

use rill_core::Broker;
use rill_server::config::Config;
use rill_server::jobs::{InMemoryBroker, JobQueue, RedisBroker};
use rill_server::network::handlers::{AppState, SchemaNotMounted};
use rill_server::network::middleware::RequestLogger;
use rill_server::network::NetworkModule;
use rill_server::storage::MemoryRepository;
use rill_server::telemetry;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::init()?;
    telemetry::init(&config.log_level, config.json_logs);
    if let Some(addr) = config.metrics_addr {
        telemetry::install_metrics_exporter(addr)?;
    }

    let broker: Arc<dyn Broker> = if let Some(url) = &config.redis_url {
        info!("publishing jobs to redis");
        Arc::new(RedisBroker::new(url, config.redis_pool_max)?)
    } else {
        warn!("no redis url configured; jobs go to the in-memory broker and are never consumed");
        Arc::new(InMemoryBroker::new())
    };
    let jobs = JobQueue::new(broker, config.queues(), config.broker_timeout());

    warn!("accounts and sessions are held in memory and lost on restart");
    let repo = Arc::new(MemoryRepository::new());

    let state = AppState {
        sessions: repo.clone(),
        accounts: repo,
        jobs,
        graphql: Arc::new(SchemaNotMounted),
        settings: Arc::new(config.app_settings()),
    };

    let mut module = NetworkModule::new(config.network(), state, RequestLogger::tracing());
    let port = module.start().await?;
    info!(port, "rill server started");

    module.serve(shutdown_signal()).await
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
