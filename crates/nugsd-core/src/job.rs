//! Download jobs and their lifecycle.
//!
//! These types are "UI safe" - Clone + Debug + Serialize + Deserialize with no
//! infrastructure dependencies. They're used for transmitting queue state to
//! the web frontend via the REST API and the SSE stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a download job.
///
/// The machine only ever advances: queued → processing → {complete, failed}.
/// A job in a terminal state is immutable except for removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting in the queue.
    Queued,
    /// Currently being processed by the worker.
    Processing,
    /// Completed successfully.
    Complete,
    /// Failed with an error.
    Failed,
}

impl JobStatus {
    /// Check if this status is terminal (complete or failed).
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// String representation used in log lines and error messages.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-job download options supplied by the caller at enqueue time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DownloadOptions {
    /// Prefer the video SKU even when the container has audio tracks.
    pub force_video: bool,
    /// Never download video SKUs.
    pub skip_videos: bool,
    /// Do not embed chapter metadata into remuxed videos.
    pub skip_chapters: bool,
}

/// A single download job in the queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique identifier, generated at enqueue.
    pub id: String,

    /// The catalog URL this job was created for.
    pub original_url: String,

    /// Options for this specific job.
    pub options: DownloadOptions,

    /// Current status.
    pub status: JobStatus,

    /// Error message if status is Failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Timestamp when the job was added.
    pub created_at: DateTime<Utc>,

    /// Timestamp when processing started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Timestamp when the job reached a terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Overall progress percentage (0-100).
    pub progress: f64,

    /// Name of the file currently being downloaded or processed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,

    /// Track currently being processed (1-based).
    pub current_track: u32,

    /// Total number of tracks for this job, when known.
    pub total_tracks: u32,

    /// Current download speed in bytes per second.
    pub speed_bps: i64,

    /// URL for album/video artwork, resolved during processing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artwork_url: Option<String>,

    /// Human-readable title derived from catalog metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Resolved upstream container ID, used for duplicate-content checks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
}

impl Job {
    /// Create a new queued job.
    pub fn new(id: impl Into<String>, url: impl Into<String>, options: DownloadOptions) -> Self {
        Self {
            id: id.into(),
            original_url: url.into(),
            options,
            status: JobStatus::Queued,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: 0.0,
            current_file: None,
            current_track: 0,
            total_tracks: 0,
            speed_bps: 0,
            artwork_url: None,
            title: None,
            container_id: None,
        }
    }

    /// Check if this job is in a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Request body for `POST /api/downloads`.
///
/// Accepts multiple URLs; the handler creates one job per URL.
#[derive(Clone, Debug, Deserialize)]
pub struct AddDownloadRequest {
    pub urls: Vec<String>,
    #[serde(default)]
    pub options: DownloadOptions,
}

/// Per-URL result of an enqueue request.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddDownloadResponseItem {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
