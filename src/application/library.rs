use crate::domain::video::VideoAsset;
use crate::ports::preprocess::VideoPreprocessor;
use crate::ports::storage::{ByteStream, StorageError, VideoStoragePort};
use crate::ports::worker::WorkerError;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("video preprocessing failed: {0}")]
    Preprocess(#[from] WorkerError),
}

/// Uploads and listing of stored videos.
pub struct VideoLibrary<S> {
    storage: S,
    preprocessor: Option<Arc<dyn VideoPreprocessor>>,
}

impl<S: VideoStoragePort> VideoLibrary<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            preprocessor: None,
        }
    }

    pub fn with_preprocessor(mut self, preprocessor: Arc<dyn VideoPreprocessor>) -> Self {
        self.preprocessor = Some(preprocessor);
        self
    }

    /// Stores the upload. With a preprocessor configured, the processed copy
    /// `resized_<name>` is written next to it and returned instead.
    pub async fn upload(
        &self,
        original_name: &str,
        body: ByteStream,
    ) -> Result<VideoAsset, LibraryError> {
        let stored = self.storage.store(original_name, body).await?;

        let Some(preprocessor) = &self.preprocessor else {
            return Ok(stored);
        };

        let output = stored.path.with_file_name(format!("resized_{}", stored.name));
        preprocessor.preprocess(&stored.path, &output).await?;
        info!("Preprocessed {:?} into {:?}", stored.path, output);

        VideoAsset::from_path(output, stored.original_name.clone())
            .ok_or_else(|| StorageError::InvalidReference(stored.name.clone()).into())
    }

    pub async fn list(&self) -> Result<Vec<VideoAsset>, LibraryError> {
        Ok(self.storage.list().await?)
    }
}
