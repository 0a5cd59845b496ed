use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;
use tokio::sync::mpsc;

/// Something observed on a running worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    /// One line of standard output
    Line(String),
    /// Process ended. Always the last event, sent exactly once.
    Exited(i32),
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("worker exited with code {0}")]
    Execution(i32),
}

/// Live view of a started worker.
#[derive(Debug)]
pub struct WorkerHandle {
    pub pid: Option<u32>,
    events: mpsc::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    pub fn new(pid: Option<u32>, events: mpsc::Receiver<WorkerEvent>) -> Self {
        Self { pid, events }
    }

    /// Handle fed by the returned sender, for workers driven in-process.
    pub fn channel(capacity: usize) -> (mpsc::Sender<WorkerEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(None, rx))
    }

    /// `None` once the worker has exited and every event was consumed.
    pub async fn next_event(&mut self) -> Option<WorkerEvent> {
        self.events.recv().await
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkerPort: Send + Sync {
    /// Start the analysis worker on `input`. Returns as soon as the
    /// process is spawned.
    async fn start(&self, input: &Path) -> Result<WorkerHandle, WorkerError>;
}
