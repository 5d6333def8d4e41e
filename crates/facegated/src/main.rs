use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod http;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facegated starting");

    let config = config::Config::from_env();

    if let Some(dir) = config.db_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating data directory {}", dir.display()))?;
    }

    let db = tokio_rusqlite::Connection::open(&config.db_path)
        .await
        .with_context(|| format!("opening database {}", config.db_path.display()))?;
    db.call(|conn| {
        facegate_store::init_schema(conn).map_err(|e| tokio_rusqlite::Error::Other(Box::new(e)))
    })
    .await
    .context("initializing database schema")?;
    tracing::info!(path = %config.db_path.display(), "database ready");

    let engine = engine::spawn_engine(&config.scrfd_model_path(), &config.arcface_model_path())
        .context("starting inference engine")?;

    let state = Arc::new(http::AppState {
        engine,
        db,
        distance_threshold: config.distance_threshold,
    });
    let app = http::router(state, config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "facegated ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("facegated shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
