//! Domain types for the nugs.net background download service.
//!
//! This crate contains the pure domain model shared by the pipeline and the
//! HTTP adapter: jobs and their status machine, progress/SSE events, the
//! error taxonomy, the persisted configuration document, and filename
//! sanitisation. No networking or async code lives here.

pub mod config;
pub mod error;
pub mod events;
pub mod fsutil;
pub mod job;

// Re-export commonly used types for convenience
pub use config::{AppConfig, ConfigError};
pub use error::{DownloadError, DownloadResult};
pub use events::{ProgressUpdate, SseEvent};
pub use fsutil::sanitize_filename;
pub use job::{
    AddDownloadRequest, AddDownloadResponseItem, DownloadOptions, Job, JobStatus,
};
