//! Basic and thematic library management.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use hubd_catalog::model::{
    BasicLibrary, CreateBasicLibrary, CreateThematicLibrary, ResourceStatus, ThematicLibrary,
    ThematicStatus, UpdateBasicLibrary, UpdateThematicLibrary,
};
use hubd_core::{Envelope, HubError, Page, Pageable};
use serde::Deserialize;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/basic-libraries", get(list_basic).post(create_basic))
        .route(
            "/basic-libraries/{id}",
            get(get_basic).put(update_basic).delete(delete_basic),
        )
        .route(
            "/thematic-libraries",
            get(list_thematic).post(create_thematic),
        )
        .route(
            "/thematic-libraries/{id}",
            get(get_thematic).put(update_thematic).delete(delete_thematic),
        )
}

#[derive(Deserialize)]
struct BasicListParams {
    page: Option<u64>,
    size: Option<u64>,
    status: Option<ResourceStatus>,
    name: Option<String>,
}

async fn create_basic(
    State(state): State<AppState>,
    Json(req): Json<CreateBasicLibrary>,
) -> Result<Envelope<BasicLibrary>, HubError> {
    let library = state.catalog.create_basic_library(req).await?;
    // The library owns a physical schema of the same name.
    state.schema.ensure_library_schema(&library.name_en).await?;
    Ok(Envelope::ok(library))
}

async fn get_basic(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<BasicLibrary>, HubError> {
    Ok(Envelope::ok(state.catalog.get_basic_library(&id).await?))
}

async fn list_basic(
    State(state): State<AppState>,
    Query(params): Query<BasicListParams>,
) -> Result<Envelope<Page<BasicLibrary>>, HubError> {
    Ok(Envelope::ok(
        state
            .catalog
            .list_basic_libraries(
                &Pageable::of(params.page, params.size),
                params.status,
                params.name.as_deref(),
            )
            .await?,
    ))
}

async fn update_basic(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateBasicLibrary>,
) -> Result<Envelope<BasicLibrary>, HubError> {
    Ok(Envelope::ok(
        state.catalog.update_basic_library(&id, req).await?,
    ))
}

#[derive(Deserialize)]
struct DeleteParams {
    #[serde(default)]
    force: bool,
}

async fn delete_basic(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<DeleteParams>,
) -> Result<Envelope<()>, HubError> {
    let library = state.catalog.get_basic_library(&id).await?;
    state.catalog.delete_basic_library(&id).await?;
    if params.force {
        state
            .schema
            .drop_library_schema(&library.name_en, true)
            .await?;
    }
    Ok(Envelope::ok_empty())
}

#[derive(Deserialize)]
struct ThematicListParams {
    page: Option<u64>,
    size: Option<u64>,
    status: Option<ThematicStatus>,
}

async fn create_thematic(
    State(state): State<AppState>,
    Json(req): Json<CreateThematicLibrary>,
) -> Result<Envelope<ThematicLibrary>, HubError> {
    Ok(Envelope::ok(state.catalog.create_thematic_library(req).await?))
}

async fn get_thematic(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<ThematicLibrary>, HubError> {
    Ok(Envelope::ok(state.catalog.get_thematic_library(&id).await?))
}

async fn list_thematic(
    State(state): State<AppState>,
    Query(params): Query<ThematicListParams>,
) -> Result<Envelope<Page<ThematicLibrary>>, HubError> {
    Ok(Envelope::ok(
        state
            .catalog
            .list_thematic_libraries(&Pageable::of(params.page, params.size), params.status)
            .await?,
    ))
}

async fn update_thematic(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateThematicLibrary>,
) -> Result<Envelope<ThematicLibrary>, HubError> {
    let previous = state.catalog.get_thematic_library(&id).await?;
    let updated = state.catalog.update_thematic_library(&id, req).await?;
    // Publishing materializes the schema.
    if previous.status != ThematicStatus::Published && updated.status == ThematicStatus::Published
    {
        state.schema.ensure_library_schema(&updated.name_en).await?;
    }
    Ok(Envelope::ok(updated))
}

async fn delete_thematic(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<DeleteParams>,
) -> Result<Envelope<()>, HubError> {
    let library = state.catalog.get_thematic_library(&id).await?;
    state.catalog.delete_thematic_library(&id).await?;
    if params.force {
        state
            .schema
            .drop_library_schema(&library.name_en, true)
            .await?;
    }
    Ok(Envelope::ok_empty())
}
