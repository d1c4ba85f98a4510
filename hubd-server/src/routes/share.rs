//! The proxied read surface: `/api/v1/share/{app_path}/{interface_path}`.
//!
//! Unlike the management API this path speaks raw HTTP statuses and
//! streams the downstream body through untouched.

use axum::extract::{Path, RawQuery, State};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use http::{HeaderMap, Method};

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/api/v1/share/{app_path}/{interface_path}", any(share))
}

async fn share(
    State(state): State<AppState>,
    Path((app_path, interface_path)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
    method: Method,
    headers: HeaderMap,
) -> Response {
    let client_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string());
    state
        .proxy
        .handle(
            method,
            &app_path,
            &interface_path,
            raw_query.as_deref(),
            &headers,
            client_ip,
        )
        .await
}
