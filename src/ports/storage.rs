use crate::domain::video::VideoAsset;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Body of an upload, as delivered by the transport.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage directory {0:?} does not exist")]
    MissingDirectory(PathBuf),
    #[error("video not found: {0}")]
    NotFound(String),
    #[error("invalid video reference: {0:?}")]
    InvalidReference(String),
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoStoragePort: Send + Sync {
    /// Persist an upload under a fresh, collision-free name
    async fn store(&self, original_name: &str, body: ByteStream)
        -> Result<VideoAsset, StorageError>;

    /// Enumerate stored videos. Order is unspecified.
    async fn list(&self) -> Result<Vec<VideoAsset>, StorageError>;

    /// Map a client supplied path or file name to a stored video
    async fn resolve(&self, reference: &str) -> Result<VideoAsset, StorageError>;
}
