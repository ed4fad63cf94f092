//! Progress and SSE events - discriminated unions for the event stream.

use serde::{Deserialize, Serialize};

use crate::job::{Job, JobStatus};

/// A real-time update on a download job's progress.
///
/// Short-lived value passed from the downloader through the progress channel
/// into the broadcast hub. Progress events are lossy by design; observers
/// must tolerate gaps.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    /// ID of the job being updated.
    pub job_id: String,

    /// Optional status change signalled alongside progress.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,

    /// Human message, e.g. "Downloading track 3/12" or "Remuxing video".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// File being processed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,

    /// Overall job percentage (0-100). -1 denotes indeterminate progress
    /// when the total transfer size is unknown.
    pub percentage: f64,

    /// Current speed in bytes per second.
    pub speed_bps: i64,

    /// Bytes downloaded for the current asset.
    pub bytes_downloaded: i64,

    /// Total bytes for the current asset (-1 if unknown).
    pub total_bytes: i64,

    /// Track currently being processed (1-based; 0 when not applicable).
    pub current_track: u32,

    /// Total number of tracks (0 when not applicable).
    pub total_tracks: u32,
}

impl ProgressUpdate {
    /// Create an update carrying only a message for a job.
    pub fn message(job_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            message: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Single discriminated union for everything sent over the SSE stream.
///
/// The frontend handles this as a TypeScript discriminated union:
///
/// ```typescript
/// type SseEvent =
///   | { type: "jobAdded"; data: Job }
///   | { type: "progressUpdate"; data: ProgressUpdate }
///   | { type: "jobStatusUpdate"; data: Job };
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum SseEvent {
    /// A job was added to the queue.
    JobAdded(Job),
    /// Progress for a job in flight.
    ProgressUpdate(ProgressUpdate),
    /// A job transitioned to a new status.
    JobStatusUpdate(Job),
}

impl SseEvent {
    /// Get the event name for SSE framing.
    ///
    /// The wire event name is the same string as the JSON discriminator tag.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::JobAdded(_) => "jobAdded",
            Self::ProgressUpdate(_) => "progressUpdate",
            Self::JobStatusUpdate(_) => "jobStatusUpdate",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::DownloadOptions;

    #[test]
    fn progress_update_serializes_camel_case() {
        let update = ProgressUpdate {
            job_id: "j1".into(),
            percentage: 42.5,
            speed_bps: 1024,
            bytes_downloaded: 4096,
            total_bytes: -1,
            ..ProgressUpdate::default()
        };
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["jobId"], "j1");
        assert_eq!(json["totalBytes"], -1);
        assert!(json.get("message").is_none());
    }

    #[test]
    fn sse_event_tag_matches_event_name() {
        let job = Job::new("j1", "https://play.nugs.net/release/1", DownloadOptions::default());
        let event = SseEvent::JobAdded(job);
        assert_eq!(event.event_name(), "jobAdded");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "jobAdded");
        assert_eq!(json["data"]["id"], "j1");
    }

    #[test]
    fn progress_event_roundtrip() {
        let event = SseEvent::ProgressUpdate(ProgressUpdate::message("j2", "Remuxing video"));
        let json = serde_json::to_string(&event).unwrap();
        let parsed: SseEvent = serde_json::from_str(&json).unwrap();
        match parsed {
            SseEvent::ProgressUpdate(update) => {
                assert_eq!(update.job_id, "j2");
                assert_eq!(update.message.as_deref(), Some("Remuxing video"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
