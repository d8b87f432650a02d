#![doc = include_str!("../README.md")]

mod worker;

use chatseq::{MemoryIndex, MemoryKv, MemoryStore, MessagingCore};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use worker::config::{CliArgs, DaemonConfig};
use worker::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = DaemonConfig::try_from(args)?;

    init_telemetry(&config.log_filter)?;
    log_startup_info(&config);

    run(config).await
}

async fn run(config: DaemonConfig) -> anyhow::Result<()> {
    let core = Arc::new(MessagingCore::new(
        Arc::new(MemoryKv::new()),
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryIndex::new()),
        config.core.clone(),
    ));

    let shutdown_token = CancellationToken::new();
    let reconciler_task = {
        let reconciler = core.reconciler().clone();
        let token = shutdown_token.clone();
        let interval = config.reconcile_interval;
        tokio::spawn(async move { reconciler.run_periodic(interval, token).await })
    };

    shutdown_signal().await;

    // Stop the reconciler first, then drain the delivery pool.
    shutdown_token.cancel();
    core.shutdown().await;
    if let Err(err) = reconciler_task.await {
        tracing::error!(%err, "reconciler task panicked");
    }

    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(config: &DaemonConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting chatseq worker with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting chatseq worker with {} delivery workers, reconciling every {:?}",
            config.num_workers,
            config.reconcile_interval
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
}
