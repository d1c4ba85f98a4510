//! Data-source management plus driver administration.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use hubd_catalog::model::{
    CreateDataSource, DataSource, SourceCategory, UpdateDataSource,
};
use hubd_core::{Envelope, HubError, Page, Pageable};
use hubd_drivers::{Driver, DriverStats, ManagerStats, PushSourceInfo, SourceHealth};
use serde::Deserialize;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/data-sources", get(list).post(create))
        .route(
            "/data-sources/{id}",
            get(get_one).put(update).delete(delete),
        )
        .route("/data-sources/{id}/reload", post(reload))
        .route("/data-sources/{id}/restart", post(restart))
        .route("/data-sources/{id}/stats", get(stats))
        .route("/data-sources/{id}/push-data", get(push_data))
        .route("/data-sources/health", get(health_all))
        .route("/data-sources/statistics", get(statistics))
        .route("/data-sources/push", get(list_push))
}

#[derive(Deserialize)]
struct ListParams {
    page: Option<u64>,
    size: Option<u64>,
    library_id: Option<String>,
    category: Option<SourceCategory>,
}

async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateDataSource>,
) -> Result<Envelope<DataSource>, HubError> {
    let source = state.catalog.create_data_source(req).await?;
    if source.is_resident {
        let driver = state.drivers.get_or_create(&source.id).await?;
        driver.start().await?;
    }
    Ok(Envelope::ok(source))
}

async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<DataSource>, HubError> {
    Ok(Envelope::ok(state.catalog.get_data_source(&id).await?))
}

async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Envelope<Page<DataSource>>, HubError> {
    Ok(Envelope::ok(
        state
            .catalog
            .list_data_sources(
                &Pageable::of(params.page, params.size),
                params.library_id.as_deref(),
                params.category,
            )
            .await?,
    ))
}

/// Config changes swap the live driver instance.
async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateDataSource>,
) -> Result<Envelope<DataSource>, HubError> {
    let source = state.catalog.update_data_source(&id, req).await?;
    state.drivers.reload(&id).await?;
    Ok(Envelope::ok(source))
}

async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<()>, HubError> {
    state.catalog.delete_data_source(&id).await?;
    state.drivers.remove(&id).await?;
    Ok(Envelope::ok_empty())
}

async fn reload(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<()>, HubError> {
    state.drivers.reload(&id).await?;
    Ok(Envelope::ok_empty())
}

async fn restart(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<()>, HubError> {
    state.drivers.restart(&id).await?;
    Ok(Envelope::ok_empty())
}

async fn stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<DriverStats>, HubError> {
    Ok(Envelope::ok(state.drivers.get_stats(&id).await?))
}

async fn health_all(
    State(state): State<AppState>,
) -> Result<Envelope<Vec<SourceHealth>>, HubError> {
    Ok(Envelope::ok(state.drivers.health_check_all().await))
}

async fn statistics(
    State(state): State<AppState>,
) -> Result<Envelope<ManagerStats>, HubError> {
    Ok(Envelope::ok(state.drivers.statistics().await))
}

async fn list_push(
    State(state): State<AppState>,
) -> Result<Envelope<std::collections::BTreeMap<String, PushSourceInfo>>, HubError> {
    Ok(Envelope::ok(state.drivers.list_push_sources().await))
}

#[derive(Deserialize)]
struct PushDataParams {
    #[serde(default = "default_peek")]
    limit: usize,
}

fn default_peek() -> usize {
    100
}

/// Non-destructive look at a push source's buffered payloads, oldest
/// first.
async fn push_data(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<PushDataParams>,
) -> Result<Envelope<Vec<hubd_core::Row>>, HubError> {
    let driver = state.drivers.get_or_create(&id).await?;
    let staged = driver.peek(params.limit).await?;
    Ok(Envelope::ok(staged.into_iter().map(|e| e.row).collect()))
}
