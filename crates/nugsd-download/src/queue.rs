//! Download queue management.
//!
//! The queue is the only mutable store of job state. A single reader/writer
//! lock protects the job list; read-only operations take the reader side and
//! no operation performs I/O while holding the lock. Callers always receive
//! copies, never references into the queue.
//!
//! # FIFO Semantics
//!
//! Insertion order equals processing order. `next_job` atomically claims the
//! first queued job, so no job is ever handed to two workers.

use std::sync::RwLock;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use nugsd_core::{DownloadError, DownloadOptions, Job, JobStatus};

/// The subset of queue operations the downloader needs to write metadata
/// back into the job it is processing.
///
/// `QueueManager` implements this; the downloader depends only on the trait,
/// which keeps the dependency one-way.
pub trait JobStore: Send + Sync {
    /// Set the human-readable title for a job.
    fn update_title(&self, job_id: &str, title: &str) -> bool;

    /// Set the artwork URL for a job.
    fn update_artwork(&self, job_id: &str, artwork_url: &str) -> bool;

    /// Record the resolved upstream container ID for a job.
    fn update_container_id(&self, job_id: &str, container_id: &str) -> bool;

    /// If a terminal-complete job recorded this container ID, return its
    /// job ID. Empty container IDs never match.
    fn completed_job_with_container_id(&self, container_id: &str) -> Option<String>;
}

/// Outcome of a removal attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemoveOutcome {
    /// The job was removed.
    Removed,
    /// No job with that ID exists.
    NotFound,
    /// The job is currently processing and cannot be removed.
    Processing,
}

/// Manages the download job queue.
pub struct QueueManager {
    jobs: RwLock<Vec<Job>>,
}

impl QueueManager {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(Vec::new()),
        }
    }

    /// Create a new job for a URL and append it to the queue.
    ///
    /// Rejects the URL if a queued or processing job already holds it.
    /// Dedup only considers non-terminal jobs: once the earlier job reaches
    /// a terminal state the same URL may be enqueued again.
    pub fn add_job(&self, url: &str, options: DownloadOptions) -> Result<Job, DownloadError> {
        let mut jobs = self.jobs.write().unwrap();

        if let Some(existing) = jobs
            .iter()
            .find(|job| job.original_url == url && !job.is_terminal())
        {
            warn!(
                url,
                existing_job_id = %existing.id,
                existing_status = %existing.status,
                "Rejected duplicate job for URL already in queue"
            );
            return Err(DownloadError::DuplicateQueued {
                url: url.to_string(),
                existing_id: existing.id.clone(),
                status: existing.status.to_string(),
            });
        }

        let job = Job::new(Uuid::new_v4().to_string(), url, options);
        jobs.push(job.clone());
        info!(job_id = %job.id, url, "Job added to queue");
        Ok(job)
    }

    /// Get a snapshot of a specific job.
    #[must_use]
    pub fn job(&self, job_id: &str) -> Option<Job> {
        let jobs = self.jobs.read().unwrap();
        jobs.iter().find(|job| job.id == job_id).cloned()
    }

    /// Get a snapshot of all jobs in insertion order.
    #[must_use]
    pub fn all_jobs(&self) -> Vec<Job> {
        self.jobs.read().unwrap().clone()
    }

    /// Get a snapshot of all terminal-complete jobs.
    #[must_use]
    pub fn completed_jobs(&self) -> Vec<Job> {
        let jobs = self.jobs.read().unwrap();
        jobs.iter()
            .filter(|job| job.status == JobStatus::Complete)
            .cloned()
            .collect()
    }

    /// Atomically claim the first queued job in FIFO order.
    ///
    /// The claimed job flips to processing and gets its start timestamp.
    /// Returns `None` when nothing is queued.
    pub fn next_job(&self) -> Option<Job> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.iter_mut().find(|job| job.status == JobStatus::Queued)?;
        job.status = JobStatus::Processing;
        job.started_at = Some(Utc::now());
        info!(job_id = %job.id, "Picked next job for processing");
        Some(job.clone())
    }

    /// Update the status (and error message) of a job.
    ///
    /// Transition effects: entering processing stamps `started_at` if unset;
    /// entering a terminal state stamps `completed_at` if unset, and complete
    /// forces progress to 100.
    pub fn update_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> bool {
        let mut jobs = self.jobs.write().unwrap();
        let Some(job) = jobs.iter_mut().find(|job| job.id == job_id) else {
            warn!(job_id, "Failed to update status for unknown job ID");
            return false;
        };

        let now = Utc::now();
        job.status = status;
        job.error_message = error_message.map(str::to_string);

        if status == JobStatus::Processing && job.started_at.is_none() {
            job.started_at = Some(now);
        }
        if status.is_terminal() && job.completed_at.is_none() {
            job.completed_at = Some(now);
            if status == JobStatus::Complete {
                job.progress = 100.0;
            }
        }
        info!(job_id, new_status = %status, "Job status updated");
        true
    }

    /// Update progress fields for a job.
    ///
    /// Percentage and speed are always written; file and track counters are
    /// written only when non-empty/non-zero (zero means "unchanged").
    pub fn update_progress(
        &self,
        job_id: &str,
        progress: f64,
        speed_bps: i64,
        current_file: &str,
        current_track: u32,
        total_tracks: u32,
    ) -> bool {
        let mut jobs = self.jobs.write().unwrap();
        let Some(job) = jobs.iter_mut().find(|job| job.id == job_id) else {
            warn!(job_id, "Failed to update progress for unknown job ID");
            return false;
        };

        job.progress = progress;
        job.speed_bps = speed_bps;
        if !current_file.is_empty() {
            job.current_file = Some(current_file.to_string());
        }
        if current_track > 0 {
            job.current_track = current_track;
        }
        if total_tracks > 0 {
            job.total_tracks = total_tracks;
        }
        debug!(job_id, progress, speed_bps, current_track, total_tracks, "Job progress updated");
        true
    }

    /// Remove a job by ID.
    ///
    /// Only queued, failed, and complete jobs may be removed; a processing
    /// job is refused.
    pub fn remove_job(&self, job_id: &str) -> RemoveOutcome {
        let mut jobs = self.jobs.write().unwrap();
        let Some(idx) = jobs.iter().position(|job| job.id == job_id) else {
            warn!(job_id, "Failed to remove job: ID not found");
            return RemoveOutcome::NotFound;
        };
        if jobs[idx].status == JobStatus::Processing {
            warn!(job_id, "Cannot remove job while it is processing");
            return RemoveOutcome::Processing;
        }
        jobs.remove(idx);
        info!(job_id, "Job removed from queue");
        RemoveOutcome::Removed
    }
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore for QueueManager {
    fn update_title(&self, job_id: &str, title: &str) -> bool {
        let mut jobs = self.jobs.write().unwrap();
        let Some(job) = jobs.iter_mut().find(|job| job.id == job_id) else {
            warn!(job_id, "Failed to update title for unknown job ID");
            return false;
        };
        job.title = Some(title.to_string());
        true
    }

    fn update_artwork(&self, job_id: &str, artwork_url: &str) -> bool {
        let mut jobs = self.jobs.write().unwrap();
        let Some(job) = jobs.iter_mut().find(|job| job.id == job_id) else {
            warn!(job_id, "Failed to update artwork for unknown job ID");
            return false;
        };
        job.artwork_url = Some(artwork_url.to_string());
        true
    }

    fn update_container_id(&self, job_id: &str, container_id: &str) -> bool {
        let mut jobs = self.jobs.write().unwrap();
        let Some(job) = jobs.iter_mut().find(|job| job.id == job_id) else {
            warn!(job_id, "Failed to update container ID for unknown job ID");
            return false;
        };
        job.container_id = Some(container_id.to_string());
        true
    }

    fn completed_job_with_container_id(&self, container_id: &str) -> Option<String> {
        if container_id.is_empty() {
            return None;
        }
        let jobs = self.jobs.read().unwrap();
        jobs.iter()
            .find(|job| {
                job.status == JobStatus::Complete
                    && job.container_id.as_deref() == Some(container_id)
            })
            .map(|job| job.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL_A: &str = "https://play.nugs.net/release/12345";
    const URL_B: &str = "https://play.nugs.net/release/67890";

    fn queue_with(urls: &[&str]) -> QueueManager {
        let qm = QueueManager::new();
        for url in urls {
            qm.add_job(url, DownloadOptions::default()).unwrap();
        }
        qm
    }

    #[test]
    fn add_job_assigns_unique_ids() {
        let qm = queue_with(&[URL_A, URL_B]);
        let jobs = qm.all_jobs();
        assert_eq!(jobs.len(), 2);
        assert_ne!(jobs[0].id, jobs[1].id);
        assert_eq!(jobs[0].status, JobStatus::Queued);
    }

    #[test]
    fn add_job_rejects_duplicate_of_queued_url() {
        let qm = queue_with(&[URL_A]);
        let err = qm.add_job(URL_A, DownloadOptions::default()).unwrap_err();
        assert!(matches!(err, DownloadError::DuplicateQueued { .. }));
        assert!(err.to_string().contains("already exists in queue"));
    }

    #[test]
    fn add_job_rejects_duplicate_of_processing_url() {
        let qm = queue_with(&[URL_A]);
        qm.next_job().unwrap();
        assert!(qm.add_job(URL_A, DownloadOptions::default()).is_err());
    }

    #[test]
    fn add_job_accepts_url_again_after_terminal() {
        let qm = queue_with(&[URL_A]);
        let job = qm.next_job().unwrap();
        qm.update_status(&job.id, JobStatus::Complete, None);

        let again = qm.add_job(URL_A, DownloadOptions::default()).unwrap();
        assert_ne!(again.id, job.id);
    }

    #[test]
    fn next_job_is_fifo_and_claims_exactly_once() {
        let qm = queue_with(&[URL_A, URL_B]);

        let first = qm.next_job().unwrap();
        assert_eq!(first.original_url, URL_A);
        assert_eq!(first.status, JobStatus::Processing);
        assert!(first.started_at.is_some());

        let second = qm.next_job().unwrap();
        assert_eq!(second.original_url, URL_B);

        assert!(qm.next_job().is_none());
    }

    #[test]
    fn complete_forces_progress_and_timestamps() {
        let qm = queue_with(&[URL_A]);
        let job = qm.next_job().unwrap();
        qm.update_progress(&job.id, 40.0, 2048, "01. Jam.flac", 1, 10);
        assert!(qm.update_status(&job.id, JobStatus::Complete, None));

        let done = qm.job(&job.id).unwrap();
        assert_eq!(done.status, JobStatus::Complete);
        assert!((done.progress - 100.0).abs() < f64::EPSILON);
        assert!(done.completed_at.is_some());
    }

    #[test]
    fn failed_records_error_message() {
        let qm = queue_with(&[URL_A]);
        let job = qm.next_job().unwrap();
        qm.update_status(&job.id, JobStatus::Failed, Some("get album meta failed: HTTP 503"));

        let failed = qm.job(&job.id).unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(
            failed.error_message.as_deref(),
            Some("get album meta failed: HTTP 503")
        );
        assert!(failed.completed_at.is_some());
    }

    #[test]
    fn update_progress_keeps_unset_fields() {
        let qm = queue_with(&[URL_A]);
        let job = qm.next_job().unwrap();
        qm.update_progress(&job.id, 10.0, 100, "01. Jam.flac", 1, 12);
        // Empty file and zero counters leave the previous values in place
        qm.update_progress(&job.id, 0.0, 0, "", 0, 0);

        let snap = qm.job(&job.id).unwrap();
        assert!((snap.progress - 0.0).abs() < f64::EPSILON);
        assert_eq!(snap.current_file.as_deref(), Some("01. Jam.flac"));
        assert_eq!(snap.current_track, 1);
        assert_eq!(snap.total_tracks, 12);
    }

    #[test]
    fn remove_job_refused_while_processing() {
        let qm = queue_with(&[URL_A]);
        let job = qm.next_job().unwrap();
        assert_eq!(qm.remove_job(&job.id), RemoveOutcome::Processing);

        qm.update_status(&job.id, JobStatus::Failed, Some("boom"));
        assert_eq!(qm.remove_job(&job.id), RemoveOutcome::Removed);
        assert_eq!(qm.remove_job(&job.id), RemoveOutcome::NotFound);
    }

    #[test]
    fn completed_jobs_filters_terminal_complete() {
        let qm = queue_with(&[URL_A, URL_B]);
        let a = qm.next_job().unwrap();
        qm.update_status(&a.id, JobStatus::Complete, None);

        let completed = qm.completed_jobs();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, a.id);
    }

    #[test]
    fn container_id_dedup_matches_only_complete_jobs() {
        let qm = queue_with(&[URL_A, URL_B]);
        let a = qm.next_job().unwrap();
        qm.update_container_id(&a.id, "98765");

        // Still processing: no match
        assert!(qm.completed_job_with_container_id("98765").is_none());

        qm.update_status(&a.id, JobStatus::Complete, None);
        assert_eq!(qm.completed_job_with_container_id("98765"), Some(a.id.clone()));

        // Empty container IDs never match
        assert!(qm.completed_job_with_container_id("").is_none());
    }

    #[test]
    fn job_store_metadata_writes() {
        let qm = queue_with(&[URL_A]);
        let job = qm.next_job().unwrap();

        assert!(qm.update_title(&job.id, "Phish - 2024/07/04 Folsom Field"));
        assert!(qm.update_artwork(&job.id, "https://img.example/cover.jpg"));
        assert!(!qm.update_title("missing", "x"));

        let snap = qm.job(&job.id).unwrap();
        assert_eq!(snap.title.as_deref(), Some("Phish - 2024/07/04 Folsom Field"));
        assert_eq!(snap.artwork_url.as_deref(), Some("https://img.example/cover.jpg"));
    }
}
