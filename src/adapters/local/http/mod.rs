//! HTTP inbound adapter.
//!
//! Thin JSON layer over the video library and the job coordinator, with the
//! route names the browser front end already uses.

mod analysis;
mod videos;

use crate::adapters::local::fs::FsStorage;
use crate::adapters::local::process::ProcessWorker;
use crate::application::coordinator::JobCoordinator;
use crate::application::library::VideoLibrary;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub type LocalCoordinator = JobCoordinator<FsStorage, ProcessWorker>;
pub type LocalLibrary = VideoLibrary<FsStorage>;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<LocalCoordinator>,
    pub library: Arc<LocalLibrary>,
}

pub fn router(state: AppState, uploads_dir: &Path, public_dir: Option<&Path>) -> Router {
    let mut router = Router::new()
        .route("/upload", post(videos::upload))
        .route("/videos", get(videos::list))
        .route("/analyze", post(analysis::analyze))
        .route("/get-analysis-progress", get(analysis::progress))
        .route("/get-analysis-result", get(analysis::result))
        .route("/get-analysis-status", get(analysis::status))
        .nest_service("/uploads", ServeDir::new(uploads_dir));

    if let Some(public_dir) = public_dir {
        router = router.fallback_service(ServeDir::new(public_dir));
    }

    router
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
