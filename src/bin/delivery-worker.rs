//! # Delivery Worker
//!
//! Standalone process running the worker pool and the reconciliation sweeper
//! against PostgreSQL. The webhook front door runs elsewhere and calls
//! [`DeliveryCore::accept`] against the same database.
//!
//! ## Usage
//!
//! ```bash
//! DATABASE_URL=postgresql://localhost/delivery cargo run --bin delivery-worker
//!
//! # Production settings, overriding the worker count
//! DELIVERY_ENV=production DELIVERY__WORKER__CONCURRENCY=16 cargo run --release --bin delivery-worker
//! ```

use anyhow::Context;
use delivery_core::config::ConfigManager;
use delivery_core::events::EventPublisher;
use delivery_core::logging;
use delivery_core::reconciliation::ReconciliationSweeper;
use delivery_core::store::PgStore;
use delivery_core::worker::WorkerPool;
use delivery_core::DeliveryCore;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_structured_logging();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting delivery worker");

    let config_manager = ConfigManager::load().context("failed to load configuration")?;
    let config = config_manager.config().clone();
    info!(
        environment = config_manager.environment(),
        concurrency = config.worker.concurrency,
        "Configuration loaded"
    );

    let store = PgStore::connect(&config.database)
        .await
        .context("failed to connect to PostgreSQL")?;
    store.migrate().await.context("failed to run migrations")?;

    let notifier = Arc::new(EventPublisher::new(config.events.channel_capacity));
    let core = DeliveryCore::new(Arc::new(store), notifier, config);

    let mut pool = WorkerPool::new(&core);
    pool.start()?;

    let cancel = CancellationToken::new();
    let sweeper_handle = if core.config().reconciliation.enabled {
        let sweeper = ReconciliationSweeper::new(core.clone());
        let token = cancel.child_token();
        Some(tokio::spawn(async move { sweeper.run(token).await }))
    } else {
        info!("Reconciliation sweeper disabled");
        None
    };

    info!("Delivery worker running; press Ctrl+C to shut down");
    shutdown_signal().await;
    info!("Shutdown signal received, stopping workers");

    cancel.cancel();
    if let Err(e) = pool.shutdown().await {
        error!(error = %e, "Worker pool did not stop cleanly");
    }
    if let Some(handle) = sweeper_handle {
        if let Err(e) = handle.await {
            warn!(error = %e, "Reconciliation sweeper ended abnormally");
        }
    }

    info!("Delivery worker shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received SIGTERM"),
    }
}
