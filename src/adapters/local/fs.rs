use crate::domain::video::VideoAsset;
use crate::ports::storage::{ByteStream, StorageError, VideoStoragePort};
use async_trait::async_trait;
use chrono::Utc;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Flat upload directory on the local filesystem.
#[derive(Clone, Debug)]
pub struct FsStorage {
    dir: PathBuf,
    /// Make stored files readable and writable by every user, for workers
    /// running under a different account.
    shared_permissions: bool,
}

impl FsStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            shared_permissions: false,
        }
    }

    pub fn with_shared_permissions(mut self, shared: bool) -> Self {
        self.shared_permissions = shared;
        self
    }

    async fn ensure_dir(&self) -> Result<(), StorageError> {
        match tokio::fs::metadata(&self.dir).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(StorageError::MissingDirectory(self.dir.clone())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::MissingDirectory(self.dir.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn write_upload(&self, file: File, body: ByteStream) -> io::Result<()> {
        if self.shared_permissions {
            set_shared_mode(&file).await?;
        }
        stream_to_file(file, body).await
    }
}

#[async_trait]
impl VideoStoragePort for FsStorage {
    async fn store(
        &self,
        original_name: &str,
        body: ByteStream,
    ) -> Result<VideoAsset, StorageError> {
        self.ensure_dir().await?;

        let path = self.dir.join(unique_file_name(original_name));
        // create_new: a name clash fails loudly instead of overwriting
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        // Every failure past this point removes the file again
        if let Err(e) = self.write_upload(file, body).await {
            warn!("Upload of {:?} failed, removing partial file: {}", original_name, e);
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e.into());
        }

        info!("Stored upload {:?} as {:?}", original_name, path);
        VideoAsset::from_path(path, Some(original_name.to_string()))
            .ok_or_else(|| StorageError::InvalidReference(original_name.to_string()))
    }

    async fn list(&self) -> Result<Vec<VideoAsset>, StorageError> {
        self.ensure_dir().await?;

        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut videos = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(asset) = VideoAsset::from_path(entry.path(), None) {
                videos.push(asset);
            }
        }
        debug!("Listed {} videos in {:?}", videos.len(), self.dir);
        Ok(videos)
    }

    async fn resolve(&self, reference: &str) -> Result<VideoAsset, StorageError> {
        // Only the file name counts, so "../" can never leave the directory
        let name = Path::new(reference)
            .file_name()
            .ok_or_else(|| StorageError::InvalidReference(reference.to_string()))?;
        let path = self.dir.join(name);

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => VideoAsset::from_path(path, None)
                .ok_or_else(|| StorageError::InvalidReference(reference.to_string())),
            Ok(_) => Err(StorageError::NotFound(reference.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(reference.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Millisecond timestamp keeps names roughly ordered, the uuid keeps them
/// unique when several uploads land in the same millisecond.
fn unique_file_name(original_name: &str) -> String {
    let extension = Path::new(original_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default();

    format!(
        "{}-{}{}",
        Utc::now().timestamp_millis(),
        Uuid::new_v4().simple(),
        extension
    )
}

#[cfg(unix)]
async fn set_shared_mode(file: &File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o666)).await
}

#[cfg(not(unix))]
async fn set_shared_mode(_file: &File) -> io::Result<()> {
    Ok(())
}

async fn stream_to_file(file: File, body: ByteStream) -> io::Result<()> {
    let mut body_reader = StreamReader::new(body);
    let mut writer = BufWriter::new(file);
    tokio::io::copy(&mut body_reader, &mut writer).await?;
    writer.flush().await?;
    Ok(())
}
