//! Download error taxonomy.
//!
//! These errors flow from the pipeline up to the worker, which records them
//! on the failed job. They deliberately avoid wrapping non-clonable types
//! like `std::io::Error`; I/O failures are captured as strings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for the download pipeline.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadError {
    /// The identity endpoint rejected the credentials or the token lacks
    /// required claims.
    #[error("authentication failed: {message}")]
    Auth {
        message: String,
    },

    /// A catalog API returned a non-success status.
    #[error("{context} failed: HTTP {status}")]
    UpstreamStatus {
        status: u16,
        context: String,
    },

    /// A response body was malformed or missing required fields.
    #[error("{context}: {message}")]
    UpstreamDecode {
        context: String,
        message: String,
    },

    /// The URL classifier yielded no match.
    #[error("unsupported URL: {url}")]
    UnsupportedUrl {
        url: String,
    },

    /// Enqueue rejected because a non-terminal job already holds this URL.
    #[error("job for URL {url} already exists in queue (ID: {existing_id}, Status: {status})")]
    DuplicateQueued {
        url: String,
        existing_id: String,
        status: String,
    },

    /// The resolved container was already downloaded by a completed job.
    ///
    /// Semantically a skip, not a failure of the system; the worker records
    /// it as failed with this descriptive message and does not retry.
    #[error("content with container ID '{container_id}' already downloaded in JobID {original_job_id}")]
    DuplicateCompleted {
        container_id: String,
        original_job_id: String,
    },

    /// Container has neither tracks nor a video SKU.
    #[error("release {container_id} has no tracks or videos")]
    NoContent {
        container_id: String,
    },

    /// Socket error, short read, or unexpected HTTP status during transfer.
    #[error("download failed: {message}")]
    Download {
        message: String,
    },

    /// Missing/invalid HLS key material or misaligned ciphertext.
    #[error("HLS key invalid: {message}")]
    HlsKey {
        message: String,
    },

    /// The external muxer exited with an unexpected status.
    #[error("muxer failed: {message}")]
    Mux {
        message: String,
    },

    /// mkdir/open/write failed.
    #[error("filesystem error at {path}: {message}")]
    Filesystem {
        path: String,
        message: String,
    },
}

impl DownloadError {
    /// Create an authentication error.
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create an upstream status error.
    pub fn upstream_status(context: impl Into<String>, status: u16) -> Self {
        Self::UpstreamStatus {
            status,
            context: context.into(),
        }
    }

    /// Create an upstream decode error.
    pub fn upstream_decode(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UpstreamDecode {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create an unsupported URL error.
    pub fn unsupported_url(url: impl Into<String>) -> Self {
        Self::UnsupportedUrl { url: url.into() }
    }

    /// Create a duplicate-completed-content error.
    pub fn duplicate_completed(
        container_id: impl Into<String>,
        original_job_id: impl Into<String>,
    ) -> Self {
        Self::DuplicateCompleted {
            container_id: container_id.into(),
            original_job_id: original_job_id.into(),
        }
    }

    /// Create a download transfer error.
    pub fn download(message: impl Into<String>) -> Self {
        Self::Download {
            message: message.into(),
        }
    }

    /// Create an HLS key error.
    pub fn hls_key(message: impl Into<String>) -> Self {
        Self::HlsKey {
            message: message.into(),
        }
    }

    /// Create a muxer error.
    pub fn mux(message: impl Into<String>) -> Self {
        Self::Mux {
            message: message.into(),
        }
    }

    /// Create a filesystem error from a path and `std::io::Error`.
    pub fn filesystem(path: impl Into<String>, err: &std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Check if this is the duplicate-completed-content sentinel.
    ///
    /// The worker handles it differently from generic failures.
    #[must_use]
    pub const fn is_duplicate_completed(&self) -> bool {
        matches!(self, Self::DuplicateCompleted { .. })
    }
}

/// Convenience result type for pipeline operations.
pub type DownloadResult<T> = Result<T, DownloadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_completed_message_names_original_job() {
        let err = DownloadError::duplicate_completed("98765", "A");
        let msg = err.to_string();
        assert!(msg.contains("already downloaded in JobID A"));
        assert!(msg.contains("98765"));
        assert!(err.is_duplicate_completed());
    }

    #[test]
    fn upstream_status_message() {
        let err = DownloadError::upstream_status("get album meta", 503);
        assert_eq!(err.to_string(), "get album meta failed: HTTP 503");
        assert!(!err.is_duplicate_completed());
    }

    #[test]
    fn serialization_roundtrip() {
        let err = DownloadError::upstream_status("get stream meta", 404);
        let json = serde_json::to_string(&err).unwrap();
        let parsed: DownloadError = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, err);
    }
}
