//! metrics-server - counter/gauge aggregation service
//!
//! This is the composition root that wires the configured storage backend
//! into the HTTP API and drives graceful shutdown.

use metrics_pipeline::adapters::inbound::ApiServer;
use metrics_pipeline::adapters::outbound::{
    SnapshotConfig, SnapshotStore, SqliteStore, VolatileStore,
};
use metrics_pipeline::config::{load_server_config, StorageBackend};
use metrics_pipeline::domain::ports::MetricStore;
use metrics_pipeline::infrastructure::{shutdown_signal, BackoffPolicy, ShutdownController};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;

/// Budget for draining requests and stopping the server after a signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_server_config()?;

    tracing_subscriber::fmt()
        .with_max_level(cfg.log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    let backend = cfg.backend();
    tracing::info!(
        "starting metrics server listen={} backend={:?}",
        cfg.address,
        backend
    );

    let shutdown = ShutdownController::new();

    // ===== COMPOSITION ROOT =====

    // 1. Storage backend
    let mut flush_task = None;
    let store: Arc<dyn MetricStore> = match backend {
        StorageBackend::Relational { dsn } => {
            let store = SqliteStore::connect(dsn, BackoffPolicy::default()).await?;
            store.bootstrap().await?;
            Arc::new(store)
        }
        StorageBackend::Snapshot { path } => {
            let store = Arc::new(
                SnapshotStore::open(SnapshotConfig {
                    store_interval: cfg.store_interval,
                    file_path: path,
                    restore: cfg.restore,
                })
                .await,
            );
            flush_task = store.start_flush_task(&shutdown);
            store
        }
        StorageBackend::Volatile => Arc::new(VolatileStore::new()),
    };

    // 2. Signal handling
    tokio::spawn(shutdown_signal(shutdown.clone()));

    // 3. HTTP API
    let server = ApiServer::new(cfg.address.clone(), store.clone(), shutdown.clone());
    let mut server_task = tokio::spawn(async move { server.run().await });

    tokio::select! {
        result = &mut server_task => {
            // the server only returns on its own when it failed to start
            result??;
        }
        _ = shutdown.wait() => {
            if let Some(Err(e)) = shutdown.finish(server_task, SHUTDOWN_GRACE).await {
                tracing::error!("server error during shutdown: {}", e);
            }
        }
    }

    // 4. Final flush
    if let Some(task) = flush_task {
        if let Err(e) = task.await {
            tracing::error!("snapshot flush task failed: {}", e);
        }
    }
    if let Err(e) = store.flush().await {
        tracing::error!("final flush failed: {}", e);
    }

    tracing::info!("metrics server stopped");
    Ok(())
}
