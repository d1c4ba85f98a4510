//! HTTP surface assembly.
//!
//! Management endpoints live under `/api/v1` and reply with the uniform
//! envelope over HTTP 200; the share proxy, SSE stream, webhook ingest
//! and health probes speak raw statuses.

pub mod apps;
pub mod health;
pub mod interfaces;
pub mod libraries;
pub mod rules;
pub mod share;
pub mod sources;
pub mod sse;
pub mod tasks;
pub mod webhooks;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let management = Router::new()
        .merge(libraries::routes())
        .merge(sources::routes())
        .merge(interfaces::routes())
        .merge(tasks::routes())
        .merge(rules::routes())
        .merge(apps::routes());

    Router::new()
        .nest("/api/v1", management)
        .merge(share::routes())
        .merge(webhooks::routes())
        .merge(sse::routes())
        .merge(health::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
