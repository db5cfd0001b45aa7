use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use wattline_core::config::{load_dotenv, Config};
use wattline_pipeline::{PipelineMetrics, WorkerPool};
use wattline_server::{build_router, AppState};
use wattline_store::build_store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env();
    config.log_summary();

    let store = build_store(&config.store).await?;
    let metrics = Arc::new(PipelineMetrics::new());

    let mut pool = WorkerPool::new(store.clone(), config.pipeline.clone(), metrics.clone());
    pool.start(config.pipeline.worker_count);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config, store, metrics));
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let in-flight batches finish before exiting.
    pool.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
