//! Single-node server.
//!
//! Wires up:
//! - Filesystem storage for uploaded videos
//! - The external analysis worker and optional upload preprocessor
//! - Job coordinator and video library
//! - HTTP API

use posecheck::adapters::local::http::{self, AppState};
use posecheck::adapters::local::{CommandPreprocessor, FsStorage, ProcessWorker};
use posecheck::{CoordinatorSettings, JobCoordinator, LocalConfig, VideoLibrary};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config = LocalConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 1. Adapters
    let storage = FsStorage::new(&config.uploads_dir)
        .with_shared_permissions(config.shared_upload_permissions);
    let worker = ProcessWorker::new(config.worker_command.clone());

    // 2. Application services
    let coordinator = Arc::new(JobCoordinator::new(
        storage.clone(),
        worker,
        CoordinatorSettings {
            result_path: config.result_path.clone(),
            tick_interval: config.tick_interval,
            tick_policy: config.tick_policy,
        },
    ));

    let mut library = VideoLibrary::new(storage);
    if let Some(command) = config.preprocess_command.clone() {
        info!("Uploads will be preprocessed with {}", command.program);
        library = library.with_preprocessor(Arc::new(CommandPreprocessor::new(command)));
    }

    // 3. HTTP layer
    let state = AppState {
        coordinator,
        library: Arc::new(library),
    };
    let app = http::router(state, &config.uploads_dir, config.public_dir.as_deref());

    // 4. Start server
    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .expect("Failed to bind TCP listener");
    info!(
        "Listening at {} (uploads in {:?}, worker {})",
        config.bind_address(),
        config.uploads_dir,
        config.worker_command.program
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server failed to start");
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down"),
        Err(e) => {
            warn!("Cannot listen for Ctrl-C, running until killed: {}", e);
            std::future::pending::<()>().await
        }
    }
}
