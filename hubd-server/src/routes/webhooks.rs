//! HTTP-push ingest: `POST /webhooks/{suffix}`.
//!
//! 200 on buffered, 404 for an unknown suffix, 503 while the driver is
//! not started. Raw statuses; no envelope.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use http::HeaderMap;
use hubd_drivers::Driver;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/webhooks/{suffix}", post(ingest))
}

async fn ingest(
    State(state): State<AppState>,
    Path(suffix): Path<String>,
    headers: HeaderMap,
    body: bytes::Bytes,
) -> Response {
    let Some(driver) = state.drivers.resolve_push(&suffix).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"error": "unknown webhook suffix"})),
        )
            .into_response();
    };
    match driver.receive_push(&headers, body).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"status": "buffered"})),
        )
            .into_response(),
        Err(e) => {
            let status = e.http_status();
            (status, Json(serde_json::json!({"error": e.public_message()}))).into_response()
        }
    }
}
