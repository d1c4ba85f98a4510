//! Sync task lifecycle, execution history and engine statistics.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use hubd_catalog::model::{
    CreateSyncTask, SyncTask, SyncTaskExecution, TaskStatus, UpdateSyncTask,
};
use hubd_core::{Envelope, HubError, Page, Pageable};
use hubd_sync::{EngineStats, ScheduledEntryInfo};
use serde::Deserialize;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync-tasks", get(list).post(create))
        .route("/sync-tasks/{id}", get(get_one).put(update).delete(delete))
        .route("/sync-tasks/{id}/activate", post(activate))
        .route("/sync-tasks/{id}/pause", post(pause))
        .route("/sync-tasks/{id}/start", post(start))
        .route("/sync-tasks/{id}/stop", post(stop))
        .route("/sync-tasks/{id}/retry", post(retry))
        .route("/sync-tasks/{id}/executions", get(executions))
        .route("/sync-tasks/engine/statistics", get(engine_statistics))
        .route("/sync-tasks/scheduler/entries", get(scheduler_entries))
        .route("/sync-tasks/executions/cleanup", post(cleanup_executions))
}

#[derive(Deserialize)]
struct ListParams {
    page: Option<u64>,
    size: Option<u64>,
    status: Option<TaskStatus>,
    library_id: Option<String>,
}

async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateSyncTask>,
) -> Result<Envelope<SyncTask>, HubError> {
    Ok(Envelope::ok(state.tasks.create(req).await?))
}

async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<SyncTask>, HubError> {
    Ok(Envelope::ok(state.tasks.get(&id).await?))
}

async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Envelope<Page<SyncTask>>, HubError> {
    Ok(Envelope::ok(
        state
            .tasks
            .list(
                &Pageable::of(params.page, params.size),
                params.status,
                params.library_id.as_deref(),
            )
            .await?,
    ))
}

async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateSyncTask>,
) -> Result<Envelope<SyncTask>, HubError> {
    Ok(Envelope::ok(state.tasks.update(&id, req).await?))
}

async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<()>, HubError> {
    state.tasks.delete(&id).await?;
    Ok(Envelope::ok_empty())
}

async fn activate(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<SyncTask>, HubError> {
    Ok(Envelope::ok(state.tasks.activate(&id).await?))
}

async fn pause(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<SyncTask>, HubError> {
    Ok(Envelope::ok(state.tasks.pause(&id).await?))
}

async fn start(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<Vec<SyncTaskExecution>>, HubError> {
    Ok(Envelope::ok(state.tasks.start(&id).await?))
}

#[derive(serde::Serialize)]
struct StopResult {
    cancelled: usize,
}

async fn stop(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<StopResult>, HubError> {
    let cancelled = state.tasks.stop(&id).await?;
    Ok(Envelope::ok(StopResult { cancelled }))
}

async fn retry(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<Vec<SyncTaskExecution>>, HubError> {
    Ok(Envelope::ok(state.tasks.retry(&id).await?))
}

async fn executions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(page): Query<Pageable>,
) -> Result<Envelope<Page<SyncTaskExecution>>, HubError> {
    Ok(Envelope::ok(state.tasks.executions(&id, &page).await?))
}

async fn engine_statistics(
    State(state): State<AppState>,
) -> Result<Envelope<EngineStats>, HubError> {
    Ok(Envelope::ok(state.tasks.engine_stats()))
}

async fn scheduler_entries(
    State(state): State<AppState>,
) -> Result<Envelope<Vec<ScheduledEntryInfo>>, HubError> {
    Ok(Envelope::ok(state.tasks.scheduler_entries().await))
}

#[derive(Deserialize)]
struct CleanupRequest {
    /// Executions started before this instant are removed.
    before: chrono::DateTime<chrono::Utc>,
}

#[derive(serde::Serialize)]
struct CleanupResult {
    removed: u64,
}

/// Execution history is append-only until this explicit cleanup.
async fn cleanup_executions(
    State(state): State<AppState>,
    Json(req): Json<CleanupRequest>,
) -> Result<Envelope<CleanupResult>, HubError> {
    let removed = state.catalog.cleanup_executions(req.before).await?;
    Ok(Envelope::ok(CleanupResult { removed }))
}
