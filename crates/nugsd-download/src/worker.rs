//! Background queue processor.
//!
//! Exactly one worker task runs for the lifetime of the process. It claims
//! jobs from the queue in FIFO order, drives the downloader, and records the
//! outcome. Strictly one job is in flight at a time; there is no cancellation
//! of a job once it is processing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use nugsd_core::{DownloadError, Job, JobStatus, ProgressUpdate};

use crate::hub::Hub;
use crate::queue::QueueManager;

/// Poll interval when the queue is empty.
const IDLE_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Per-job entry point the worker drives.
///
/// `Downloader` implements this; tests substitute their own.
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Process one job to completion.
    async fn run(&self, job: &Job) -> Result<(), DownloadError>;
}

/// Spawn the single background worker task.
pub fn spawn_worker(
    queue: Arc<QueueManager>,
    runner: Arc<dyn JobRunner>,
    hub: Hub,
) -> JoinHandle<()> {
    info!("Starting background queue processor");
    tokio::spawn(async move {
        loop {
            let Some(job) = queue.next_job() else {
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
                continue;
            };

            info!(job_id = %job.id, url = %job.original_url, "Processing job");
            let result = runner.run(&job).await;

            match result {
                Ok(()) => {
                    info!(job_id = %job.id, "Job completed successfully");
                    queue.update_status(&job.id, JobStatus::Complete, None);
                }
                Err(err) if err.is_duplicate_completed() => {
                    info!(job_id = %job.id, reason = %err, "Job is a duplicate of completed content, skipping");
                    queue.update_status(&job.id, JobStatus::Failed, Some(&err.to_string()));
                }
                Err(err) => {
                    error!(job_id = %job.id, error = %err, "Job failed");
                    queue.update_status(&job.id, JobStatus::Failed, Some(&err.to_string()));
                }
            }

            // Broadcast the post-transition snapshot so observers see the
            // terminal status with its timestamps.
            if let Some(updated) = queue.job(&job.id) {
                debug!(job_id = %updated.id, status = %updated.status, "Broadcasting job status");
                hub.broadcast_job_status_update(&updated);
            }
        }
    })
}

/// Spawn the single progress consumer.
///
/// Forwards every update from the downloader's progress channel into the
/// queue (so REST reads stay current) and into the hub (so SSE observers see
/// it live).
pub fn spawn_progress_consumer(
    mut progress_rx: mpsc::Receiver<ProgressUpdate>,
    queue: Arc<QueueManager>,
    hub: Hub,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(update) = progress_rx.recv().await {
            queue.update_progress(
                &update.job_id,
                update.percentage,
                update.speed_bps,
                update.current_file.as_deref().unwrap_or(""),
                update.current_track,
                update.total_tracks,
            );
            hub.broadcast_progress_update(&update);
        }
        debug!("Progress channel closed, consumer exiting");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use nugsd_core::DownloadOptions;

    use crate::hub::hub;

    /// Runner that records the jobs it sees and returns canned results.
    struct ScriptedRunner {
        results: Mutex<Vec<Result<(), DownloadError>>>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        fn new(results: Vec<Result<(), DownloadError>>) -> Self {
            Self {
                results: Mutex::new(results),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl JobRunner for ScriptedRunner {
        async fn run(&self, job: &Job) -> Result<(), DownloadError> {
            self.seen.lock().unwrap().push(job.id.clone());
            self.results.lock().unwrap().remove(0)
        }
    }

    async fn wait_for_terminal(queue: &QueueManager, job_id: &str) -> Job {
        for _ in 0..200 {
            if let Some(job) = queue.job(job_id) {
                if job.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {job_id} never reached a terminal state");
    }

    #[tokio::test]
    async fn worker_marks_success_complete_and_broadcasts() {
        let queue = Arc::new(QueueManager::new());
        let (hub_handle, dispatcher) = hub();
        tokio::spawn(dispatcher.run());
        let mut sub = hub_handle.subscribe().await;
        tokio::task::yield_now().await;

        let job = queue
            .add_job("https://play.nugs.net/release/1", DownloadOptions::default())
            .unwrap();
        let runner = Arc::new(ScriptedRunner::new(vec![Ok(())]));
        spawn_worker(Arc::clone(&queue), runner, hub_handle.clone());

        let done = wait_for_terminal(&queue, &job.id).await;
        assert_eq!(done.status, JobStatus::Complete);
        assert!((done.progress - 100.0).abs() < f64::EPSILON);

        let frame = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .unwrap()
            .unwrap();
        let text = String::from_utf8(frame).unwrap();
        assert!(text.starts_with("event: jobStatusUpdate\n"));
        assert!(text.contains(r#""status":"complete""#));
    }

    #[tokio::test]
    async fn worker_marks_failure_with_error_message() {
        let queue = Arc::new(QueueManager::new());
        let (hub_handle, dispatcher) = hub();
        tokio::spawn(dispatcher.run());

        let job = queue
            .add_job("https://play.nugs.net/release/2", DownloadOptions::default())
            .unwrap();
        let runner = Arc::new(ScriptedRunner::new(vec![Err(
            DownloadError::upstream_status("get album meta", 503),
        )]));
        spawn_worker(Arc::clone(&queue), runner, hub_handle);

        let done = wait_for_terminal(&queue, &job.id).await;
        assert_eq!(done.status, JobStatus::Failed);
        assert_eq!(
            done.error_message.as_deref(),
            Some("get album meta failed: HTTP 503")
        );
    }

    #[tokio::test]
    async fn worker_records_duplicate_completed_as_failed_without_retry() {
        let queue = Arc::new(QueueManager::new());
        let (hub_handle, dispatcher) = hub();
        tokio::spawn(dispatcher.run());

        let job = queue
            .add_job("https://play.nugs.net/release/3", DownloadOptions::default())
            .unwrap();
        let runner = Arc::new(ScriptedRunner::new(vec![Err(
            DownloadError::duplicate_completed("98765", "job-a"),
        )]));
        let runner_probe = Arc::clone(&runner);
        spawn_worker(Arc::clone(&queue), runner, hub_handle);

        let done = wait_for_terminal(&queue, &job.id).await;
        assert_eq!(done.status, JobStatus::Failed);
        assert!(done
            .error_message
            .as_deref()
            .unwrap()
            .contains("already downloaded in JobID job-a"));

        // The worker must not hand the job back to the runner.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(runner_probe.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn worker_processes_jobs_in_fifo_order() {
        let queue = Arc::new(QueueManager::new());
        let (hub_handle, dispatcher) = hub();
        tokio::spawn(dispatcher.run());

        let first = queue
            .add_job("https://play.nugs.net/release/10", DownloadOptions::default())
            .unwrap();
        let second = queue
            .add_job("https://play.nugs.net/release/11", DownloadOptions::default())
            .unwrap();

        let runner = Arc::new(ScriptedRunner::new(vec![Ok(()), Ok(())]));
        let runner_probe = Arc::clone(&runner);
        spawn_worker(Arc::clone(&queue), runner, hub_handle);

        wait_for_terminal(&queue, &second.id).await;
        let seen = runner_probe.seen.lock().unwrap().clone();
        assert_eq!(seen, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn progress_consumer_updates_queue_and_hub() {
        let queue = Arc::new(QueueManager::new());
        let (hub_handle, dispatcher) = hub();
        tokio::spawn(dispatcher.run());
        let mut sub = hub_handle.subscribe().await;
        tokio::task::yield_now().await;

        let job = queue
            .add_job("https://play.nugs.net/release/20", DownloadOptions::default())
            .unwrap();

        let (tx, rx) = mpsc::channel(16);
        spawn_progress_consumer(rx, Arc::clone(&queue), hub_handle);

        tx.send(ProgressUpdate {
            job_id: job.id.clone(),
            percentage: 25.0,
            speed_bps: 4096,
            current_file: Some("01. Jam.flac".into()),
            current_track: 1,
            total_tracks: 4,
            ..ProgressUpdate::default()
        })
        .await
        .unwrap();

        let frame = tokio::time::timeout(Duration::from_secs(2), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(String::from_utf8(frame)
            .unwrap()
            .starts_with("event: progressUpdate\n"));

        let snap = queue.job(&job.id).unwrap();
        assert!((snap.progress - 25.0).abs() < f64::EPSILON);
        assert_eq!(snap.current_file.as_deref(), Some("01. Jam.flac"));
        assert_eq!(snap.total_tracks, 4);
    }
}
