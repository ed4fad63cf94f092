//! Download job handlers - submission, listing, and removal.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::info;

use nugsd_core::{AddDownloadRequest, AddDownloadResponseItem, Job};
use nugsd_download::urls::classify;
use nugsd_download::RemoveOutcome;

use crate::error::HttpError;
use crate::state::AppState;

/// `POST /api/downloads`.
///
/// One job per URL. Always answers 202; per-URL failures (duplicate queued
/// URL, empty URL) are reported in the response body, not as a 4xx.
pub async fn add(
    State(state): State<AppState>,
    Json(request): Json<AddDownloadRequest>,
) -> (StatusCode, Json<Vec<AddDownloadResponseItem>>) {
    let mut results = Vec::with_capacity(request.urls.len());
    for url in &request.urls {
        // Unrecognised URLs are rejected here rather than becoming jobs
        // doomed to fail in the worker.
        if classify(url).is_none() {
            results.push(AddDownloadResponseItem {
                url: url.clone(),
                job_id: None,
                error: Some(format!("unsupported URL: {url}")),
            });
            continue;
        }
        match state.queue.add_job(url, request.options) {
            Ok(job) => {
                state.hub.broadcast_job_added(&job);
                results.push(AddDownloadResponseItem {
                    url: url.clone(),
                    job_id: Some(job.id),
                    error: None,
                });
            }
            Err(err) => results.push(AddDownloadResponseItem {
                url: url.clone(),
                job_id: None,
                error: Some(err.to_string()),
            }),
        }
    }
    (StatusCode::ACCEPTED, Json(results))
}

/// `GET /api/downloads`.
pub async fn list(State(state): State<AppState>) -> Json<Vec<Job>> {
    Json(state.queue.all_jobs())
}

/// `GET /api/downloads/{id}`.
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, HttpError> {
    state
        .queue
        .job(&id)
        .map(Json)
        .ok_or_else(|| HttpError::NotFound(format!("job {id} not found")))
}

/// `DELETE /api/downloads/{id}`.
///
/// The reason text distinguishes an unknown job from one that is refusing
/// removal because it is processing.
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, HttpError> {
    match state.queue.remove_job(&id) {
        RemoveOutcome::Removed => {
            info!(job_id = %id, "Job removed via API");
            Ok(StatusCode::NO_CONTENT)
        }
        RemoveOutcome::NotFound => Err(HttpError::NotFound(format!("job {id} not found"))),
        RemoveOutcome::Processing => Err(HttpError::NotFound(format!(
            "job {id} cannot be removed while processing"
        ))),
    }
}
