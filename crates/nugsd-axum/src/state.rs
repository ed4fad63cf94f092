//! Shared application state type.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use nugsd_core::AppConfig;
use nugsd_download::{Hub, QueueManager};

/// Services and shared state the handlers need.
pub struct ApiContext {
    /// The job queue.
    pub queue: Arc<QueueManager>,
    /// Publisher handle to the broadcast hub.
    pub hub: Hub,
    /// Live configuration, shared with the downloader.
    pub config: Arc<RwLock<AppConfig>>,
    /// Where the configuration document is persisted.
    pub config_path: PathBuf,
}

/// Application state shared across all handlers.
pub type AppState = Arc<ApiContext>;
