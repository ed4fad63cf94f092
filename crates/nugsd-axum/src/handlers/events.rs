//! SSE status stream.
//!
//! The hub pre-renders complete SSE frames (`event: <tag>\ndata: <json>\n\n`)
//! into each subscriber's bounded sink, so this handler only has to move
//! bytes. Keep-alive comment frames are interleaved to defeat proxy idle
//! timeouts. Dropping the stream (client disconnect) unregisters the sink.

use std::convert::Infallible;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures_util::StreamExt;
use tokio_stream::wrappers::IntervalStream;

use crate::state::AppState;

/// Keep-alive comment cadence.
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// `GET /api/status-stream`.
pub async fn stream(State(state): State<AppState>) -> Response {
    let subscription = state.hub.subscribe().await;

    let frames = futures_util::stream::unfold(subscription, |mut subscription| async move {
        subscription
            .recv()
            .await
            .map(|frame| (Ok::<_, Infallible>(Bytes::from(frame)), subscription))
    });

    let keep_alive = IntervalStream::new(tokio::time::interval(KEEP_ALIVE_INTERVAL))
        .map(|_| Ok(Bytes::from_static(b": keep-alive\n\n")));

    let body = Body::from_stream(futures_util::stream::select(frames, keep_alive));

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        body,
    )
        .into_response()
}
