//! Job pipeline for the nugs.net background download service.
//!
//! This crate owns the four layers the service is built around:
//!
//! - `queue` - the FIFO job queue with deduplication and lifecycle
//! - `worker` - the single-consumer driver and the progress consumer
//! - `hub` - the broadcast hub fanning events out to SSE subscribers
//! - `download` - the per-job orchestrator and its collaborators
//!   (`session`, `urls`, `catalog`, `quality`, `hls`, `remux`, `progress`)

pub(crate) mod catalog;
pub mod download;
pub(crate) mod hls;
pub mod hub;
pub(crate) mod progress;
pub(crate) mod quality;
pub mod queue;
pub(crate) mod remux;
pub(crate) mod session;
pub mod urls;
pub(crate) mod video;
pub mod worker;

pub use download::{build_clients, Downloader};
pub use hub::{Hub, HubDispatcher, Subscription};
pub use queue::{JobStore, QueueManager, RemoveOutcome};
pub use session::{Session, StreamParams};
pub use worker::{spawn_progress_consumer, spawn_worker, JobRunner};
