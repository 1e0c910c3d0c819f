use std::sync::Arc;

use task_sweeper::config::Config;
use task_sweeper::logging::{init_tracing, LogConfig};
use task_sweeper::store::Store;
use task_sweeper::workers::WorkerManager;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = Config::from_env();

    init_tracing(&LogConfig::from(&config));
    tracing::info!(
        sled_path = %config.sled_path,
        cron = %config.sweep.cron,
        zone = %config.sweep.schedule_zone(),
        retention_days = config.sweep.retention_days,
        "Starting task-sweeper"
    );

    let store = Arc::new(Store::open(&config.sled_path).expect("Failed to open sled database"));
    store.run_migrations().expect("Failed to run migrations");
    tracing::info!(tasks = store.count_tasks(), "Store ready");

    let (shutdown_tx, _) = broadcast::channel::<()>(8);

    let worker_manager = WorkerManager::new(store.clone(), shutdown_tx.subscribe(), &config);
    let worker_handle = tokio::spawn(async move {
        if let Err(e) = worker_manager.start().await {
            tracing::error!(error = %e, "Worker manager failed");
        }
    });

    if config.worker.is_leader {
        shutdown_signal(shutdown_tx.clone()).await;
    } else {
        tracing::warn!("WORKER_LEADER is off; nothing to schedule");
    }

    match worker_handle.await {
        Err(e) => tracing::error!(error = %e, "Worker task panicked"),
        Ok(()) => tracing::info!("Worker manager exited normally"),
    }

    tracing::info!("Flushing store before exit");
    if let Err(e) = store.flush() {
        tracing::error!(error = %e, "Failed to flush store before exit");
    }
    tracing::info!("Shutdown complete");
}

async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
