//! Data / thematic interface management and managed-table access.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use hubd_catalog::model::{
    CreateDataInterface, CreateThematicInterface, DataInterface, ThematicInterface, ThematicKind,
    UpdateDataInterface, UpdateThematicInterface,
};
use hubd_core::{Envelope, HubError, Page, Pageable, Row};
use hubd_schema::{SchemaOp, TableInfo};
use serde::Deserialize;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/data-interfaces", get(list).post(create))
        .route(
            "/data-interfaces/{id}",
            get(get_one).put(update).delete(delete),
        )
        .route(
            "/data-interfaces/{id}/table",
            get(table_info).post(manage_table),
        )
        .route("/data-interfaces/{id}/data", get(table_data))
        .route(
            "/thematic-interfaces",
            get(list_thematic).post(create_thematic),
        )
        .route(
            "/thematic-interfaces/{id}",
            get(get_thematic).put(update_thematic).delete(delete_thematic),
        )
        .route("/schemas/{schema}/tables", get(list_tables))
}

#[derive(Deserialize)]
struct ListParams {
    page: Option<u64>,
    size: Option<u64>,
    library_id: Option<String>,
    data_source_id: Option<String>,
}

async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateDataInterface>,
) -> Result<Envelope<DataInterface>, HubError> {
    let interface = state.catalog.create_data_interface(req).await?;
    let library = state.catalog.get_basic_library(&interface.library_id).await?;
    state
        .schema
        .manage_table_schema(
            SchemaOp::Create,
            &library.name_en,
            &interface.name_en,
            interface.fields(),
            false,
        )
        .await?;
    Ok(Envelope::ok(interface))
}

async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<DataInterface>, HubError> {
    Ok(Envelope::ok(state.catalog.get_data_interface(&id).await?))
}

async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Envelope<Page<DataInterface>>, HubError> {
    Ok(Envelope::ok(
        state
            .catalog
            .list_data_interfaces(
                &Pageable::of(params.page, params.size),
                params.library_id.as_deref(),
                params.data_source_id.as_deref(),
            )
            .await?,
    ))
}

async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateDataInterface>,
) -> Result<Envelope<DataInterface>, HubError> {
    Ok(Envelope::ok(
        state.catalog.update_data_interface(&id, req).await?,
    ))
}

#[derive(Deserialize)]
struct DeleteParams {
    #[serde(default)]
    force: bool,
}

async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<DeleteParams>,
) -> Result<Envelope<()>, HubError> {
    let interface = state.catalog.get_data_interface(&id).await?;
    let library = state.catalog.get_basic_library(&interface.library_id).await?;
    state.catalog.delete_data_interface(&id).await?;
    if params.force {
        state
            .schema
            .manage_table_schema(
                SchemaOp::Drop,
                &library.name_en,
                &interface.name_en,
                interface.fields(),
                true,
            )
            .await?;
    }
    Ok(Envelope::ok_empty())
}

#[derive(Deserialize)]
struct ManageTableRequest {
    op: SchemaOp,
    #[serde(default)]
    force: bool,
}

/// Create / diff-alter / drop the physical table from the cataloged
/// field set.
async fn manage_table(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ManageTableRequest>,
) -> Result<Envelope<()>, HubError> {
    let interface = state.catalog.get_data_interface(&id).await?;
    let library = state.catalog.get_basic_library(&interface.library_id).await?;
    state
        .schema
        .manage_table_schema(
            req.op,
            &library.name_en,
            &interface.name_en,
            interface.fields(),
            req.force,
        )
        .await?;
    Ok(Envelope::ok_empty())
}

async fn table_info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<TableInfo>, HubError> {
    let interface = state.catalog.get_data_interface(&id).await?;
    let library = state.catalog.get_basic_library(&interface.library_id).await?;
    Ok(Envelope::ok(
        state
            .schema
            .get_table_info(&library.name_en, &interface.name_en)
            .await?,
    ))
}

#[derive(Deserialize)]
struct TableDataParams {
    #[serde(default = "default_limit")]
    limit: u64,
    #[serde(default)]
    offset: u64,
    #[serde(rename = "where")]
    where_clause: Option<String>,
}

fn default_limit() -> u64 {
    100
}

#[derive(serde::Serialize)]
struct TableData {
    rows: Vec<Row>,
    total: u64,
}

async fn table_data(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<TableDataParams>,
) -> Result<Envelope<TableData>, HubError> {
    let interface = state.catalog.get_data_interface(&id).await?;
    let library = state.catalog.get_basic_library(&interface.library_id).await?;
    let (rows, total) = state
        .schema
        .get_table_data(
            &library.name_en,
            &interface.name_en,
            params.limit,
            params.offset,
            params.where_clause.as_deref(),
        )
        .await?;
    Ok(Envelope::ok(TableData { rows, total }))
}

async fn list_tables(
    State(state): State<AppState>,
    Path(schema): Path<String>,
) -> Result<Envelope<Vec<String>>, HubError> {
    Ok(Envelope::ok(state.schema.list_tables(&schema).await?))
}

// ── Thematic interfaces ────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ThematicListParams {
    page: Option<u64>,
    size: Option<u64>,
    library_id: Option<String>,
}

/// Views materialize immediately; tables share the field-set contract.
async fn create_thematic(
    State(state): State<AppState>,
    Json(req): Json<CreateThematicInterface>,
) -> Result<Envelope<ThematicInterface>, HubError> {
    let interface = state.catalog.create_thematic_interface(req).await?;
    let library = state
        .catalog
        .get_thematic_library(&interface.library_id)
        .await?;
    materialize_thematic(&state, &library.name_en, &interface).await?;
    Ok(Envelope::ok(interface))
}

async fn materialize_thematic(
    state: &AppState,
    schema: &str,
    interface: &ThematicInterface,
) -> Result<(), HubError> {
    match interface.kind {
        ThematicKind::View => {
            let sql = interface
                .view_sql
                .as_deref()
                .ok_or_else(|| HubError::invalid_input("view_sql", "missing"))?;
            state
                .schema
                .create_or_replace_view(schema, &interface.name_en, sql)
                .await
        }
        ThematicKind::Table => {
            let fields = interface
                .table_fields
                .as_ref()
                .map(|f| f.0.as_slice())
                .ok_or_else(|| HubError::invalid_input("table_fields", "missing"))?;
            state
                .schema
                .manage_table_schema(SchemaOp::Create, schema, &interface.name_en, fields, false)
                .await
        }
    }
}

async fn get_thematic(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<ThematicInterface>, HubError> {
    Ok(Envelope::ok(state.catalog.get_thematic_interface(&id).await?))
}

async fn list_thematic(
    State(state): State<AppState>,
    Query(params): Query<ThematicListParams>,
) -> Result<Envelope<Page<ThematicInterface>>, HubError> {
    Ok(Envelope::ok(
        state
            .catalog
            .list_thematic_interfaces(
                &Pageable::of(params.page, params.size),
                params.library_id.as_deref(),
            )
            .await?,
    ))
}

/// A view-SQL update re-issues `CREATE OR REPLACE VIEW`.
async fn update_thematic(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateThematicInterface>,
) -> Result<Envelope<ThematicInterface>, HubError> {
    let touched_definition = req.view_sql.is_some() || req.table_fields.is_some();
    let interface = state.catalog.update_thematic_interface(&id, req).await?;
    if touched_definition {
        let library = state
            .catalog
            .get_thematic_library(&interface.library_id)
            .await?;
        materialize_thematic(&state, &library.name_en, &interface).await?;
    }
    Ok(Envelope::ok(interface))
}

async fn delete_thematic(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<DeleteParams>,
) -> Result<Envelope<()>, HubError> {
    let interface = state.catalog.get_thematic_interface(&id).await?;
    let library = state
        .catalog
        .get_thematic_library(&interface.library_id)
        .await?;
    state.catalog.delete_thematic_interface(&id).await?;
    if params.force {
        match interface.kind {
            ThematicKind::View => {
                state
                    .schema
                    .drop_view(&library.name_en, &interface.name_en)
                    .await?
            }
            ThematicKind::Table => {
                state
                    .schema
                    .manage_table_schema(
                        SchemaOp::Drop,
                        &library.name_en,
                        &interface.name_en,
                        &[],
                        true,
                    )
                    .await?
            }
        }
    }
    Ok(Envelope::ok_empty())
}
