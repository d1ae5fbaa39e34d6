use std::sync::Arc;

use clap::Parser;
use tokio::sync::Notify;

use cinder::config::{Cli, ServiceConfig};
use cinder::ratelimiter::RateLimiter;
use cinder::server::{self, AppState};
use cinder::store::blob::LocalFsBlobStore;
use cinder::store::{BurnStore, FileMode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cinder=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = Arc::new(ServiceConfig::from_env(cli)?);

    let blobs = LocalFsBlobStore::new(config.data_dir.clone())?;
    let store = Arc::new(BurnStore::new(Box::new(blobs)));
    let limiter = Arc::new(RateLimiter::new());
    let shutdown = Arc::new(Notify::new());

    spawn_sweeper(store.clone(), limiter.clone(), shutdown.clone());

    let state = Arc::new(AppState {
        store,
        limiter,
        config: config.clone(),
        shutdown: shutdown.clone(),
    });

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "cinder listening");

    let app = server::router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    Ok(())
}

async fn shutdown_signal(shutdown: Arc<Notify>) {
    tokio::select! {
        _ = shutdown.notified() => {},
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("ctrl-c received, shutting down");
        }
    }
}

/// Periodic expiry sweep (SPEC_FULL §: "expiry sweeper as a background
/// task"). Walks notes/files/tokens for expired rows, then removes the
/// corresponding blobs — whole files by direct delete, chunked files by
/// deleting the whole chunk-directory prefix — and garbage-collects the
/// rate limiter's per-IP windows.
fn spawn_sweeper(store: Arc<BurnStore>, limiter: Arc<RateLimiter>, shutdown: Arc<Notify>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(5));
        loop {
            tokio::select! {
                _ = interval.tick() => {},
                _ = shutdown.notified() => break,
            }
            let now = chrono::Utc::now();
            let report = store.sweep_expired(now);
            if report.notes_reclaimed > 0 || report.files_reclaimed > 0 || report.tokens_reclaimed > 0 {
                tracing::info!(
                    notes = report.notes_reclaimed,
                    files = report.files_reclaimed,
                    tokens = report.tokens_reclaimed,
                    "expiry sweep reclaimed records"
                );
            }
            for (storage_path, mode) in &report.file_storage_paths {
                let result = match mode {
                    FileMode::Whole => store.blobs().delete(storage_path).await.map(|_| ()),
                    FileMode::Chunked => store.blobs().delete_prefix(storage_path).await.map(|_| ()),
                };
                if let Err(e) = result {
                    tracing::warn!(path = %storage_path, error = %e, "failed to reclaim expired blob");
                }
            }
            limiter.gc(now);
        }
    });
}
