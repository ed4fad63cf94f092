//! Route definitions and router construction.

use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::{Any, CorsLayer};

use crate::archive;
use crate::handlers;
use crate::state::AppState;

/// Build all API routes without the `/api` prefix.
fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/config",
            get(handlers::config::get).post(handlers::config::update),
        )
        .route(
            "/downloads",
            get(handlers::downloads::list).post(handlers::downloads::add),
        )
        .route(
            "/downloads/{id}",
            get(handlers::downloads::get).delete(handlers::downloads::remove),
        )
        .route("/history", get(handlers::history::list))
        .route("/download/{id}", get(archive::download))
        .route("/status-stream", get(handlers::events::stream))
}

/// Create the main router with all API routes and the health check.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ping", get(ping))
        .nest("/api", api_routes().with_state(state).layer(cors))
}

/// Health check endpoint.
async fn ping() -> Json<serde_json::Value> {
    Json(serde_json::json!({"message": "pong"}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::{Arc, RwLock};

    use nugsd_core::AppConfig;
    use nugsd_download::{hub::hub, QueueManager};

    fn test_state() -> AppState {
        let (hub_handle, dispatcher) = hub();
        tokio::spawn(dispatcher.run());
        Arc::new(crate::state::ApiContext {
            queue: Arc::new(QueueManager::new()),
            hub: hub_handle,
            config: Arc::new(RwLock::new(AppConfig::default())),
            config_path: PathBuf::from("config.json"),
        })
    }

    async fn request(
        router: &Router,
        method: axum::http::Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (axum::http::StatusCode, serde_json::Value) {
        use tower::ServiceExt as _;

        let builder = axum::http::Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header(axum::http::header::CONTENT_TYPE, "application/json")
                .body(axum::body::Body::from(serde_json::to_vec(&json).unwrap()))
                .unwrap(),
            None => builder.body(axum::body::Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn ping_pongs() {
        let router = create_router(test_state());
        let (status, body) =
            request(&router, axum::http::Method::GET, "/ping", None).await;
        assert_eq!(status, axum::http::StatusCode::OK);
        assert_eq!(body["message"], "pong");
    }

    #[tokio::test]
    async fn add_download_returns_202_with_per_url_results() {
        let router = create_router(test_state());
        let payload = serde_json::json!({
            "urls": [
                "https://play.nugs.net/release/12345",
                "https://play.nugs.net/release/12345"
            ],
            "options": {}
        });
        let (status, body) = request(
            &router,
            axum::http::Method::POST,
            "/api/downloads",
            Some(payload),
        )
        .await;

        assert_eq!(status, axum::http::StatusCode::ACCEPTED);
        let results = body.as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0]["jobId"].is_string());
        // Second enqueue of the same URL is rejected per-URL, not as a 4xx
        assert!(results[1]["error"]
            .as_str()
            .unwrap()
            .contains("already exists in queue"));
    }

    #[tokio::test]
    async fn add_download_rejects_unrecognised_url_per_url() {
        let router = create_router(test_state());
        let payload = serde_json::json!({
            "urls": ["https://example.com/not-a-catalog-url"],
            "options": {}
        });
        let (status, body) = request(
            &router,
            axum::http::Method::POST,
            "/api/downloads",
            Some(payload),
        )
        .await;

        assert_eq!(status, axum::http::StatusCode::ACCEPTED);
        let results = body.as_array().unwrap();
        assert!(results[0]["jobId"].is_null());
        assert!(results[0]["error"]
            .as_str()
            .unwrap()
            .contains("unsupported URL"));
    }

    #[tokio::test]
    async fn get_unknown_job_is_404() {
        let router = create_router(test_state());
        let (status, body) = request(
            &router,
            axum::http::Method::GET,
            "/api/downloads/nope",
            None,
        )
        .await;
        assert_eq!(status, axum::http::StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn delete_processing_job_is_refused_with_reason() {
        let state = test_state();
        let job = state
            .queue
            .add_job("https://play.nugs.net/release/7", Default::default())
            .unwrap();
        state.queue.next_job().unwrap();

        let router = create_router(Arc::clone(&state));
        let (status, body) = request(
            &router,
            axum::http::Method::DELETE,
            &format!("/api/downloads/{}", job.id),
            None,
        )
        .await;
        assert_eq!(status, axum::http::StatusCode::NOT_FOUND);
        assert!(body["error"]
            .as_str()
            .unwrap()
            .contains("cannot be removed while processing"));
    }

    #[tokio::test]
    async fn delete_queued_job_is_204() {
        let state = test_state();
        let job = state
            .queue
            .add_job("https://play.nugs.net/release/8", Default::default())
            .unwrap();

        let router = create_router(Arc::clone(&state));
        let (status, _) = request(
            &router,
            axum::http::Method::DELETE,
            &format!("/api/downloads/{}", job.id),
            None,
        )
        .await;
        assert_eq!(status, axum::http::StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn config_update_rejects_bad_format() {
        let router = create_router(test_state());
        let mut bad = serde_json::to_value(AppConfig::default()).unwrap();
        bad["format"] = serde_json::json!(9);

        let (status, body) = request(
            &router,
            axum::http::Method::POST,
            "/api/config",
            Some(bad),
        )
        .await;
        assert_eq!(status, axum::http::StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("format"));
    }

    #[tokio::test]
    async fn history_lists_only_complete_jobs() {
        let state = test_state();
        let a = state
            .queue
            .add_job("https://play.nugs.net/release/1", Default::default())
            .unwrap();
        state
            .queue
            .add_job("https://play.nugs.net/release/2", Default::default())
            .unwrap();
        state.queue.next_job().unwrap();
        state
            .queue
            .update_status(&a.id, nugsd_core::JobStatus::Complete, None);

        let router = create_router(Arc::clone(&state));
        let (status, body) =
            request(&router, axum::http::Method::GET, "/api/history", None).await;
        assert_eq!(status, axum::http::StatusCode::OK);
        let jobs = body.as_array().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0]["id"], a.id.as_str());
    }
}
