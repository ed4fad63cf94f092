//! History handler - terminal-complete jobs.

use axum::extract::State;
use axum::Json;

use nugsd_core::Job;

use crate::state::AppState;

/// `GET /api/history`.
pub async fn list(State(state): State<AppState>) -> Json<Vec<Job>> {
    Json(state.queue.completed_jobs())
}
