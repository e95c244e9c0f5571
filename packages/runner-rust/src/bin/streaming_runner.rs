//! `streaming-runner` binary: runs one streaming source until it is deleted
//! or the process is signalled.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use streaming_runner::{
    health, BrokerRegistry, DirectoryFeatureStore, FileSourceWatcher, HttpRuntimeClient,
    MemoryBroker, RunnerConfig, SourceController,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RunnerConfig::parse();
    init_tracing(config.production);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        source = %config.source_key(),
        "Starting streaming-runner"
    );

    PrometheusBuilder::new()
        .with_http_listener(config.metrics_addr)
        .install()
        .context("installing metrics exporter")?;

    let mut brokers = BrokerRegistry::new();
    brokers.register(MemoryBroker::new());
    info!(brokers = ?brokers.kinds(), "brokers registered");

    let runtime = Arc::new(
        HttpRuntimeClient::new(&config.runtime_addr, config.rpc_timeout())
            .context("building runtime client")?,
    );
    let store = Arc::new(DirectoryFeatureStore::new(&config.feature_dir));
    let mut controller = SourceController::new(
        config.source_key(),
        Arc::new(brokers),
        runtime,
        store,
        config.controller(),
    );

    let shutdown = CancellationToken::new();
    let (events_tx, events_rx) = mpsc::channel(16);
    let watcher = FileSourceWatcher::new(
        &config.source_file,
        config.source_key(),
        config.poll_interval(),
    );
    tokio::spawn(watcher.run(events_tx, shutdown.clone()));

    let health_task = tokio::spawn(health::serve(config.health_addr, controller.readiness_handle(), {
        let shutdown = shutdown.clone();
        async move { shutdown.cancelled().await }
    }));

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            wait_for_signal().await;
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    controller.run(events_rx, shutdown.clone()).await;
    shutdown.cancel();

    match health_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(error = %err, "health server failed"),
        Err(err) => error!(error = %err, "health server task panicked"),
    }
    info!("streaming-runner stopped");
    Ok(())
}

fn init_tracing(production: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if production {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
