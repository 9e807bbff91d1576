//! nodeshare orchestrator
//!
//! Serves a pool of shared nodes declared in a config repository to the
//! client parties listed in that same repository.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use nodeshare_orchestrator::{
    api,
    config::{self, CONFIG_REPO_ENV},
    engine::LocalEngine,
    pool::Pool,
    reconciler::Reconciler,
    repo::{fetcher_for, MemoryFetcher, RepoFetcher},
    reservation::ReservationQueue,
    state::AppState,
    worker::{MaintenanceWorker, ReconcileWorker},
    workload::WorkloadLedger,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const WORKER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to NODESHARE_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting nodeshare orchestrator");
    info!(listen_addr = %config.listen_addr, "Configuration loaded");

    let fetcher: Arc<dyn RepoFetcher> = match &config.config_repo {
        Some(url) => {
            info!(repo = %url, "Using config repository");
            fetcher_for(url, config.fetch_timeout)
        }
        None => {
            warn!("{} is not set, pool stays inactive", CONFIG_REPO_ENV);
            Arc::new(MemoryFetcher::default())
        }
    };

    let pool = Arc::new(Pool::new());
    let engine = Arc::new(LocalEngine::new());
    let reconciler = Arc::new(Reconciler::new(
        pool.clone(),
        engine.clone(),
        fetcher,
        config.config_repo.clone(),
    ));
    let queue = Arc::new(ReservationQueue::new());
    let ledger = Arc::new(WorkloadLedger::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reconcile_worker = ReconcileWorker::new(reconciler.clone(), config.reconcile_interval);
    let reconcile_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            reconcile_worker.run(shutdown_rx).await;
        }
    });

    let maintenance_worker =
        MaintenanceWorker::new(queue.clone(), pool, engine, config.maintenance_interval);
    let maintenance_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            maintenance_worker.run(shutdown_rx).await;
        }
    });

    let state = AppState::new(reconciler, queue, ledger);
    if let Some(namespace) = state.namespace() {
        info!(namespace = %namespace, "Serving protocol namespace");
    }

    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    // Spawn the server with graceful shutdown
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down");
    for (worker, handle) in [
        ("reconcile", reconcile_handle),
        ("maintenance", maintenance_handle),
    ] {
        if tokio::time::timeout(WORKER_SHUTDOWN_TIMEOUT, handle).await.is_err() {
            warn!(worker, "Worker did not shut down in time");
        }
    }

    info!("Orchestrator shutdown complete");
    Ok(())
}
