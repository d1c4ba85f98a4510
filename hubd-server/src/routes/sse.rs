//! SSE stream plus the persisted-notification management surface.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use hubd_catalog::model::SseEventRecord;
use hubd_core::{Envelope, HubError, Page, Pageable};
use hubd_events::{ConnectionInfo, HubEvent};
use http::HeaderMap;
use serde::Deserialize;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sse/{user_name}", get(stream))
        .route("/sse-connections", get(connections))
        .route("/sse-events/unread/{user_name}", get(unread))
        .route("/sse-events/{id}/read", post(mark_read))
        .route("/sse-events/send", post(send))
}

async fn stream(
    State(state): State<AppState>,
    Path(user_name): Path<String>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let client_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string());
    let connection_id = uuid::Uuid::new_v4().to_string();
    let client = state
        .events
        .add_connection(&user_name, &connection_id, client_ip)
        .await;
    client.into_response(state.events.clone(), user_name)
}

async fn connections(
    State(state): State<AppState>,
) -> Result<Envelope<Vec<ConnectionInfo>>, HubError> {
    Ok(Envelope::ok(state.events.connections().await))
}

async fn unread(
    State(state): State<AppState>,
    Path(user_name): Path<String>,
    Query(page): Query<Pageable>,
) -> Result<Envelope<Page<SseEventRecord>>, HubError> {
    Ok(Envelope::ok(
        state.catalog.list_unread_events(&user_name, &page).await?,
    ))
}

async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<()>, HubError> {
    state.catalog.mark_event_read(&id).await?;
    Ok(Envelope::ok_empty())
}

#[derive(Deserialize)]
struct SendEventRequest {
    event_type: String,
    /// Absent for a broadcast.
    user_name: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(serde::Serialize)]
struct SendEventResult {
    delivered: usize,
}

async fn send(
    State(state): State<AppState>,
    Json(req): Json<SendEventRequest>,
) -> Result<Envelope<SendEventResult>, HubError> {
    let delivered = match req.user_name {
        Some(user) => {
            let event = HubEvent::for_user(&req.event_type, &user, req.data);
            state.events.send_to_user(&user, event).await
        }
        None => {
            let event = HubEvent::broadcast(&req.event_type, req.data);
            state.events.broadcast(event).await
        }
    };
    Ok(Envelope::ok(SendEventResult { delivered }))
}
