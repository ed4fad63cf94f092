//! HTTP admin surface.
//!
//! A thin Axum adapter over the pipeline: job submission and listing, config
//! read/write, completed-job archives, and the SSE status stream fed by the
//! broadcast hub. All handlers delegate to the queue and hub contracts.

mod archive;
mod error;
mod handlers;
mod routes;
mod state;

pub use error::HttpError;
pub use routes::create_router;
pub use state::{ApiContext, AppState};
