use super::worker::WorkerError;
use async_trait::async_trait;
use std::path::Path;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoPreprocessor: Send + Sync {
    /// Write a processed copy of `input` to `output`, waiting for completion
    async fn preprocess(&self, input: &Path, output: &Path) -> Result<(), WorkerError>;
}
