//! Configuration handlers - read and update the persisted document.

use axum::extract::State;
use axum::Json;
use tracing::{error, info};

use nugsd_core::AppConfig;

use crate::error::HttpError;
use crate::state::AppState;

/// `GET /api/config`.
pub async fn get(State(state): State<AppState>) -> Json<AppConfig> {
    let config = state.config.read().unwrap().clone();
    Json(config)
}

/// `POST /api/config`.
///
/// Validates, persists, and only then swaps the in-memory document; invalid
/// format codes are a 400.
pub async fn update(
    State(state): State<AppState>,
    Json(updated): Json<AppConfig>,
) -> Result<Json<AppConfig>, HttpError> {
    updated
        .validate()
        .map_err(|err| HttpError::BadRequest(err.to_string()))?;

    if let Err(err) = updated.save(&state.config_path) {
        error!(error = %err, "Failed to save configuration");
        return Err(HttpError::Internal("Failed to save configuration".to_string()));
    }

    *state.config.write().unwrap() = updated.clone();
    info!("Configuration updated and saved");
    Ok(Json(updated))
}
