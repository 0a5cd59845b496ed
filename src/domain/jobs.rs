//! Single-slot analysis job state.
//!
//! `AnalysisSlot` owns the current job, its progress tracker and the last
//! successful result. Every transition goes through it so that callers only
//! need one lock around the slot to keep the three consistent.

use super::analysis::AnalysisResult;
use super::progress::{ProgressTracker, TickPolicy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Running,
    Completed,
    Failed,
}

/// Why a job ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobFailure {
    #[error("failed to start analysis worker: {message}")]
    WorkerSpawn { message: String },
    #[error("analysis worker exited with code {code}")]
    WorkerExecution { code: i32 },
    #[error("could not read analysis result: {message}")]
    ResultParse { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("analysis job {job_id} is already running")]
pub struct JobAlreadyRunning {
    pub job_id: String,
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub video: PathBuf,
    pub state: JobState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failure: Option<JobFailure>,
}

impl Job {
    fn start(video: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            video,
            state: JobState::Running,
            started_at: Utc::now(),
            finished_at: None,
            failure: None,
        }
    }
}

/// Point-in-time view of the slot, returned by status reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatus {
    pub state: JobState,
    pub job_id: Option<String>,
    pub video: Option<PathBuf>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub progress: u8,
    pub error: Option<JobFailure>,
}

/// Last successful result, kept until a newer job completes.
#[derive(Debug, Default, Clone)]
pub struct ResultStore {
    current: Option<Arc<AnalysisResult>>,
}

impl ResultStore {
    pub fn put(&mut self, result: AnalysisResult) {
        self.current = Some(Arc::new(result));
    }

    pub fn get(&self) -> Option<Arc<AnalysisResult>> {
        self.current.clone()
    }
}

#[derive(Debug)]
pub struct AnalysisSlot {
    job: Option<Job>,
    progress: ProgressTracker,
    results: ResultStore,
}

impl AnalysisSlot {
    pub fn new(policy: TickPolicy) -> Self {
        Self {
            job: None,
            progress: ProgressTracker::new(policy),
            results: ResultStore::default(),
        }
    }

    pub fn state(&self) -> JobState {
        self.job.as_ref().map_or(JobState::Idle, |job| job.state)
    }

    pub fn job(&self) -> Option<&Job> {
        self.job.as_ref()
    }

    pub fn progress(&self) -> u8 {
        self.progress.current()
    }

    pub fn result(&self) -> Option<Arc<AnalysisResult>> {
        self.results.get()
    }

    pub fn status(&self) -> JobStatus {
        let job = self.job.as_ref();
        JobStatus {
            state: self.state(),
            job_id: job.map(|j| j.id.clone()),
            video: job.map(|j| j.video.clone()),
            started_at: job.map(|j| j.started_at),
            finished_at: job.and_then(|j| j.finished_at),
            progress: self.progress.current(),
            error: job.and_then(|j| j.failure.clone()),
        }
    }

    /// Accepts a new job unless one is running. Progress is reset before the
    /// job becomes visible as `Running`.
    pub fn begin(&mut self, video: PathBuf) -> Result<String, JobAlreadyRunning> {
        if let Some(job) = self.job.as_ref().filter(|j| j.state == JobState::Running) {
            return Err(JobAlreadyRunning {
                job_id: job.id.clone(),
            });
        }

        self.progress.reset();
        let job = Job::start(video);
        let id = job.id.clone();
        self.job = Some(job);
        Ok(id)
    }

    pub fn on_output_line(&mut self, job_id: &str, line: &str) -> bool {
        if !self.is_running(job_id) {
            return false;
        }
        self.progress.on_output_line(line)
    }

    /// Returns whether further ticks can still have an effect.
    pub fn on_tick(&mut self, job_id: &str) -> bool {
        self.is_running(job_id) && self.progress.tick()
    }

    pub fn complete(&mut self, job_id: &str, result: AnalysisResult) -> bool {
        if !self.is_running(job_id) {
            return false;
        }
        self.results.put(result);
        self.progress.finalize();
        self.finish(JobState::Completed, None);
        true
    }

    /// Progress is left where it was so a failed job never reads as 100%.
    pub fn fail(&mut self, job_id: &str, failure: JobFailure) -> bool {
        if !self.is_running(job_id) {
            return false;
        }
        self.finish(JobState::Failed, Some(failure));
        true
    }

    fn is_running(&self, job_id: &str) -> bool {
        self.job
            .as_ref()
            .is_some_and(|j| j.id == job_id && j.state == JobState::Running)
    }

    fn finish(&mut self, state: JobState, failure: Option<JobFailure>) {
        if let Some(job) = self.job.as_mut() {
            job.state = state;
            job.failure = failure;
            job.finished_at = Some(Utc::now());
        }
    }
}

impl Default for AnalysisSlot {
    fn default() -> Self {
        Self::new(TickPolicy::default())
    }
}
