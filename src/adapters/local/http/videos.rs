use super::AppState;
use crate::application::library::LibraryError;
use crate::ports::storage::{ByteStream, StorageError};
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    Json,
};
use bytes::Bytes;
use futures::StreamExt;
use serde::Serialize;
use std::io;
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub file_path: String,
    pub file_name: String,
}

#[derive(Debug, Serialize)]
pub struct VideoEntry {
    pub name: String,
    pub path: String,
}

/// Stores the first file field of a multipart form.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, (StatusCode, String)> {
    loop {
        let mut field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                error!("Malformed upload: {}", e);
                return Err((e.status(), e.body_text()));
            }
        };
        let file_name = if let Some(file_name) = field.file_name() {
            file_name.to_owned()
        } else {
            continue;
        };
        info!("Receiving upload {:?}", file_name);

        // The field borrows the request, so chunks are pumped into a channel
        // that the storage side reads as an owned stream.
        let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(8);
        let body: ByteStream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (chunk, rx))
        })
        .boxed();

        let pump = async move {
            loop {
                let next = match field.chunk().await {
                    Ok(Some(chunk)) => Ok(chunk),
                    Ok(None) => break,
                    Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
                };
                let failed = next.is_err();
                if tx.send(next).await.is_err() || failed {
                    break;
                }
            }
        };

        let (stored, ()) = tokio::join!(state.library.upload(&file_name, body), pump);
        let asset = stored.map_err(library_error)?;

        return Ok(Json(UploadResponse {
            file_path: asset.path.to_string_lossy().into_owned(),
            file_name,
        }));
    }

    Err((StatusCode::BAD_REQUEST, "No file uploaded.".to_owned()))
}

pub async fn list(
    State(state): State<AppState>,
) -> Result<Json<Vec<VideoEntry>>, (StatusCode, String)> {
    let videos = state.library.list().await.map_err(library_error)?;

    Ok(Json(
        videos
            .into_iter()
            .map(|video| VideoEntry {
                name: video.name,
                path: video.path.to_string_lossy().into_owned(),
            })
            .collect(),
    ))
}

fn library_error(err: LibraryError) -> (StatusCode, String) {
    let status = match &err {
        LibraryError::Storage(StorageError::InvalidReference(_)) => StatusCode::BAD_REQUEST,
        LibraryError::Storage(StorageError::NotFound(_)) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error!("Video request failed: {}", err);
    (status, err.to_string())
}
