//! Single-flight analysis job coordinator.
//!
//! One job at a time: `submit` starts the worker and returns immediately,
//! a background task feeds worker output and fallback ticks into the shared
//! `AnalysisSlot`, and reads (`current_progress`, `current_result`,
//! `current_status`) take the slot lock only for a copy.

use crate::domain::analysis::{AnalysisResult, ResultParseError};
use crate::domain::jobs::{AnalysisSlot, JobAlreadyRunning, JobFailure, JobState, JobStatus};
use crate::domain::progress::TickPolicy;
use crate::ports::storage::{StorageError, VideoStoragePort};
use crate::ports::worker::{WorkerEvent, WorkerHandle, WorkerPort};
use parking_lot::Mutex;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    AlreadyRunning(#[from] JobAlreadyRunning),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Clone, Debug)]
pub struct CoordinatorSettings {
    /// Where the worker writes its result artifact
    pub result_path: PathBuf,
    /// Period of the fallback ticker. Zero turns fallback ticking off.
    pub tick_interval: Duration,
    pub tick_policy: TickPolicy,
}

pub struct JobCoordinator<S, W> {
    storage: S,
    worker: W,
    slot: Arc<Mutex<AnalysisSlot>>,
    result_path: PathBuf,
    tick_interval: Duration,
}

impl<S, W> JobCoordinator<S, W>
where
    S: VideoStoragePort,
    W: WorkerPort,
{
    pub fn new(storage: S, worker: W, settings: CoordinatorSettings) -> Self {
        Self {
            storage,
            worker,
            slot: Arc::new(Mutex::new(AnalysisSlot::new(settings.tick_policy))),
            result_path: settings.result_path,
            tick_interval: settings.tick_interval,
        }
    }

    /// Starts analysis of a stored video and returns the new job id.
    ///
    /// Only an unknown video or a job that is still running reject the
    /// submission. Anything that goes wrong after acceptance, including a
    /// worker that cannot be spawned, shows up as a `Failed` job state.
    pub async fn submit(&self, video_reference: &str) -> Result<String, SubmitError> {
        let video = self.storage.resolve(video_reference).await?;
        let job_id = self.slot.lock().begin(video.path.clone())?;
        info!("Accepted analysis job {} for {:?}", job_id, video.path);
        let pending = PendingStart::new(self.slot.clone(), job_id.clone());

        // A leftover artifact must never be mistaken for this job's output
        if let Err(e) = remove_stale_artifact(&self.result_path).await {
            warn!("Could not remove old result {:?}: {}", self.result_path, e);
        }

        let started = self.worker.start(&video.path).await;
        pending.disarm();

        match started {
            Ok(handle) => {
                tokio::spawn(drive_job(
                    self.slot.clone(),
                    job_id.clone(),
                    handle,
                    self.result_path.clone(),
                    self.tick_interval,
                ));
            }
            Err(e) => {
                error!("Analysis job {} could not start: {}", job_id, e);
                self.slot.lock().fail(
                    &job_id,
                    JobFailure::WorkerSpawn {
                        message: e.to_string(),
                    },
                );
            }
        }

        Ok(job_id)
    }

    pub fn current_progress(&self) -> u8 {
        self.slot.lock().progress()
    }

    /// Last successful result, whatever the state of the current job.
    pub fn current_result(&self) -> Option<Arc<AnalysisResult>> {
        self.slot.lock().result()
    }

    pub fn current_status(&self) -> JobStatus {
        self.slot.lock().status()
    }

    pub fn state(&self) -> JobState {
        self.slot.lock().state()
    }
}

/// Fails an accepted job whose `submit` was dropped before the worker
/// started, so the slot does not stay `Running` with nothing driving it.
struct PendingStart {
    slot: Arc<Mutex<AnalysisSlot>>,
    job_id: String,
    armed: bool,
}

impl PendingStart {
    fn new(slot: Arc<Mutex<AnalysisSlot>>, job_id: String) -> Self {
        Self {
            slot,
            job_id,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingStart {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("Submission of job {} was cancelled before its worker started", self.job_id);
        self.slot.lock().fail(
            &self.job_id,
            JobFailure::WorkerSpawn {
                message: "submission cancelled before the worker started".to_string(),
            },
        );
    }
}

async fn remove_stale_artifact(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Owns a running worker until its exit has been applied to the slot.
async fn drive_job(
    slot: Arc<Mutex<AnalysisSlot>>,
    job_id: String,
    mut handle: WorkerHandle,
    result_path: PathBuf,
    tick_interval: Duration,
) {
    debug!("Driving job {} (worker pid {:?})", job_id, handle.pid);

    // interval_at panics on a zero period
    let period = tick_interval.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticking = !tick_interval.is_zero();

    let exit_code = loop {
        tokio::select! {
            event = handle.next_event() => match event {
                Some(WorkerEvent::Line(line)) => {
                    if slot.lock().on_output_line(&job_id, &line) {
                        debug!("Job {} reported: {}", job_id, line);
                        ticking = false;
                    }
                }
                Some(WorkerEvent::Exited(code)) => break code,
                None => {
                    warn!("Worker for job {} went away without an exit code", job_id);
                    break -1;
                }
            },
            _ = ticker.tick(), if ticking => {
                ticking = slot.lock().on_tick(&job_id);
            }
        }
    };

    let outcome = if exit_code == 0 {
        read_result(&result_path)
            .await
            .map_err(|e| JobFailure::ResultParse {
                message: e.to_string(),
            })
    } else {
        Err(JobFailure::WorkerExecution { code: exit_code })
    };

    let mut slot = slot.lock();
    match outcome {
        Ok(result) => {
            let count = result.measurements.len();
            if slot.complete(&job_id, result) {
                info!("Analysis job {} completed with {} measurements", job_id, count);
            }
        }
        Err(failure) => {
            if slot.fail(&job_id, failure.clone()) {
                error!("Analysis job {} failed: {}", job_id, failure);
            }
        }
    }
}

async fn read_result(path: &Path) -> Result<AnalysisResult, ResultParseError> {
    let data = tokio::fs::read(path).await?;
    AnalysisResult::from_json(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::video::VideoAsset;
    use crate::ports::storage::MockVideoStoragePort;
    use crate::ports::worker::{MockWorkerPort, WorkerError};
    use tempfile::{tempdir, TempDir};
    use tokio::sync::mpsc;

    const ARTIFACT: &str = r#"[{"From":"hip","To":"knee","Angle":12.5,"IsCorrect":true}]"#;

    fn storage() -> MockVideoStoragePort {
        let mut storage = MockVideoStoragePort::new();
        storage.expect_resolve().returning(|reference| {
            if reference.contains("missing") {
                return Err(StorageError::NotFound(reference.to_string()));
            }
            Ok(VideoAsset::from_path(PathBuf::from("/uploads").join(reference), None).unwrap())
        });
        storage
    }

    /// Worker mock whose `start` hands out pre-built handles in order.
    fn worker(handles: Vec<WorkerHandle>) -> MockWorkerPort {
        let mut worker = MockWorkerPort::new();
        let mut handles = handles.into_iter();
        worker
            .expect_start()
            .times(handles.len())
            .returning(move |_| Ok(handles.next().unwrap()));
        worker
    }

    fn coordinator(
        worker: MockWorkerPort,
        tick_interval: Duration,
    ) -> (JobCoordinator<MockVideoStoragePort, MockWorkerPort>, TempDir) {
        let dir = tempdir().unwrap();
        let settings = CoordinatorSettings {
            result_path: dir.path().join("result.json"),
            tick_interval,
            tick_policy: TickPolicy::default(),
        };
        (JobCoordinator::new(storage(), worker, settings), dir)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    async fn send(tx: &mpsc::Sender<WorkerEvent>, event: WorkerEvent) {
        tx.send(event).await.unwrap();
    }

    const NO_TICKS: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_second_submit_rejected_while_running() {
        let (_tx, handle) = WorkerHandle::channel(8);
        let (coordinator, _dir) = coordinator(worker(vec![handle]), NO_TICKS);

        let first = coordinator.submit("a.mp4").await.unwrap();
        let err = coordinator.submit("b.mp4").await.unwrap_err();

        match err {
            SubmitError::AlreadyRunning(running) => assert_eq!(running.job_id, first),
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(coordinator.state(), JobState::Running);
    }

    #[tokio::test]
    async fn test_markers_then_successful_completion() {
        let (tx, handle) = WorkerHandle::channel(8);
        let (coordinator, dir) = coordinator(worker(vec![handle]), NO_TICKS);

        coordinator.submit("a.mp4").await.unwrap();
        assert_eq!(coordinator.current_progress(), 0);

        send(&tx, WorkerEvent::Line("Progress: 10%".into())).await;
        wait_until(|| coordinator.current_progress() == 10).await;
        send(&tx, WorkerEvent::Line("hello".into())).await;
        send(&tx, WorkerEvent::Line("Progress: 55%".into())).await;
        wait_until(|| coordinator.current_progress() == 55).await;

        std::fs::write(dir.path().join("result.json"), ARTIFACT).unwrap();
        send(&tx, WorkerEvent::Exited(0)).await;
        wait_until(|| coordinator.state() == JobState::Completed).await;

        assert_eq!(coordinator.current_progress(), 100);
        let result = coordinator.current_result().unwrap();
        assert_eq!(result.measurements.len(), 1);
        assert_eq!(result.measurements[0].angle, 12.5);
        assert!(result.measurements[0].is_correct);
    }

    #[tokio::test]
    async fn test_non_zero_exit_fails_without_result() {
        let (tx, handle) = WorkerHandle::channel(8);
        let (coordinator, _dir) = coordinator(worker(vec![handle]), NO_TICKS);

        coordinator.submit("a.mp4").await.unwrap();
        send(&tx, WorkerEvent::Line("Progress: 20%".into())).await;
        send(&tx, WorkerEvent::Exited(1)).await;
        wait_until(|| coordinator.state() == JobState::Failed).await;

        let status = coordinator.current_status();
        assert_eq!(status.error, Some(JobFailure::WorkerExecution { code: 1 }));
        assert_eq!(status.progress, 20);
        assert!(coordinator.current_result().is_none());
    }

    #[tokio::test]
    async fn test_spawn_failure_marks_job_failed() {
        let mut worker = MockWorkerPort::new();
        worker.expect_start().times(1).returning(|_| {
            Err(WorkerError::Spawn(io::Error::new(
                io::ErrorKind::NotFound,
                "no such file",
            )))
        });
        let (coordinator, _dir) = coordinator(worker, NO_TICKS);

        assert!(coordinator.submit("a.mp4").await.is_ok());

        let status = coordinator.current_status();
        assert_eq!(status.state, JobState::Failed);
        assert!(matches!(status.error, Some(JobFailure::WorkerSpawn { .. })));
        assert_eq!(status.progress, 0);
        assert!(coordinator.current_result().is_none());
    }

    #[tokio::test]
    async fn test_unknown_video_is_rejected_immediately() {
        let (coordinator, _dir) = coordinator(worker(vec![]), NO_TICKS);

        let err = coordinator.submit("missing.mp4").await.unwrap_err();
        assert!(matches!(err, SubmitError::Storage(StorageError::NotFound(_))));
        assert_eq!(coordinator.state(), JobState::Idle);
    }

    #[tokio::test]
    async fn test_parse_failure_keeps_previous_result() {
        let (tx1, first) = WorkerHandle::channel(8);
        let (tx2, second) = WorkerHandle::channel(8);
        let (coordinator, dir) = coordinator(worker(vec![first, second]), NO_TICKS);
        let artifact = dir.path().join("result.json");

        coordinator.submit("a.mp4").await.unwrap();
        std::fs::write(&artifact, ARTIFACT).unwrap();
        send(&tx1, WorkerEvent::Exited(0)).await;
        wait_until(|| coordinator.state() == JobState::Completed).await;

        coordinator.submit("b.mp4").await.unwrap();
        assert_eq!(coordinator.current_progress(), 0);
        std::fs::write(&artifact, "[{\"From\": \"hip\"").unwrap();
        send(&tx2, WorkerEvent::Exited(0)).await;
        wait_until(|| coordinator.state() == JobState::Failed).await;

        assert!(matches!(
            coordinator.current_status().error,
            Some(JobFailure::ResultParse { .. })
        ));
        assert_eq!(coordinator.current_result().unwrap().measurements[0].angle, 12.5);
        assert!(coordinator.current_progress() < 100);
    }

    #[tokio::test]
    async fn test_previous_artifact_is_not_reused() {
        let (tx, handle) = WorkerHandle::channel(8);
        let (coordinator, dir) = coordinator(worker(vec![handle]), NO_TICKS);
        std::fs::write(dir.path().join("result.json"), ARTIFACT).unwrap();

        coordinator.submit("a.mp4").await.unwrap();
        send(&tx, WorkerEvent::Exited(0)).await;
        wait_until(|| coordinator.state() == JobState::Failed).await;

        assert!(coordinator.current_result().is_none());
    }

    #[tokio::test]
    async fn test_closed_event_stream_fails_job() {
        let (tx, handle) = WorkerHandle::channel(8);
        let (coordinator, _dir) = coordinator(worker(vec![handle]), NO_TICKS);

        coordinator.submit("a.mp4").await.unwrap();
        drop(tx);
        wait_until(|| coordinator.state() == JobState::Failed).await;

        assert_eq!(
            coordinator.current_status().error,
            Some(JobFailure::WorkerExecution { code: -1 })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_ticks_until_marker() {
        let (tx, handle) = WorkerHandle::channel(8);
        let (coordinator, _dir) = coordinator(worker(vec![handle]), Duration::from_secs(1));

        coordinator.submit("a.mp4").await.unwrap();
        assert_eq!(coordinator.current_progress(), 0);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(coordinator.current_progress(), 10);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(coordinator.current_progress(), 20);

        send(&tx, WorkerEvent::Line("Progress: 35%".into())).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(coordinator.current_progress(), 35);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(coordinator.current_progress(), 35);
        assert_eq!(coordinator.state(), JobState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_worker_ticks_to_cap_and_stays_running() {
        let (_tx, handle) = WorkerHandle::channel(8);
        let (coordinator, _dir) = coordinator(worker(vec![handle]), Duration::from_secs(1));

        coordinator.submit("a.mp4").await.unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(coordinator.current_progress(), TickPolicy::default().cap);
        assert_eq!(coordinator.state(), JobState::Running);
        assert!(matches!(
            coordinator.submit("b.mp4").await,
            Err(SubmitError::AlreadyRunning(_))
        ));
    }

    /// Worker whose start takes long enough for a caller to give up.
    struct SlowWorker;

    #[async_trait::async_trait]
    impl WorkerPort for SlowWorker {
        async fn start(&self, _input: &Path) -> Result<WorkerHandle, WorkerError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(WorkerHandle::channel(8).1)
        }
    }

    #[tokio::test]
    async fn test_dropped_submit_does_not_block_later_jobs() {
        let dir = tempdir().unwrap();
        let coordinator = JobCoordinator::new(
            storage(),
            SlowWorker,
            CoordinatorSettings {
                result_path: dir.path().join("result.json"),
                tick_interval: NO_TICKS,
                tick_policy: TickPolicy::default(),
            },
        );

        let abandoned =
            tokio::time::timeout(Duration::from_millis(50), coordinator.submit("a.mp4")).await;
        assert!(abandoned.is_err());

        let status = coordinator.current_status();
        assert_eq!(status.state, JobState::Failed);
        assert!(matches!(status.error, Some(JobFailure::WorkerSpawn { .. })));

        let second = coordinator.submit("b.mp4").await.unwrap();
        assert_eq!(coordinator.current_status().job_id, Some(second));
    }

    #[tokio::test]
    async fn test_zero_tick_interval_disables_ticking() {
        let (tx, handle) = WorkerHandle::channel(8);
        let (coordinator, dir) = coordinator(worker(vec![handle]), Duration::ZERO);

        coordinator.submit("a.mp4").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(coordinator.current_progress(), 0);

        std::fs::write(dir.path().join("result.json"), ARTIFACT).unwrap();
        send(&tx, WorkerEvent::Exited(0)).await;
        wait_until(|| coordinator.state() == JobState::Completed).await;
        assert_eq!(coordinator.current_progress(), 100);
    }

    #[tokio::test]
    async fn test_reads_are_idempotent() {
        let (coordinator, _dir) = coordinator(worker(vec![]), NO_TICKS);

        assert_eq!(coordinator.current_progress(), coordinator.current_progress());
        assert_eq!(coordinator.current_status(), coordinator.current_status());
        assert!(coordinator.current_result().is_none());
        assert!(coordinator.current_result().is_none());
    }
}
