//! API application, interface, key, rate-limit and usage-log management.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use hubd_catalog::model::{
    ApiApplication, ApiInterface, ApiKey, ApiRateLimit, ApiUsageLog, CreateApiApplication,
    CreateApiInterface, CreateApiKey, CreateApiRateLimit, ResourceStatus, UpdateApiApplication,
};
use hubd_core::{Envelope, HubError, Page, Pageable};
use serde::Deserialize;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api-applications", get(list_apps).post(create_app))
        .route(
            "/api-applications/{id}",
            get(get_app).put(update_app).delete(delete_app),
        )
        .route(
            "/api-applications/{id}/interfaces",
            get(list_interfaces).post(create_interface),
        )
        .route("/api-interfaces/{id}", get(get_interface).delete(delete_interface))
        .route("/api-keys", get(list_keys).post(create_key))
        .route("/api-keys/{id}", get(get_key).delete(delete_key))
        .route("/api-keys/{id}/status", post(set_key_status))
        .route("/api-rate-limits", post(create_rate_limit))
        .route("/api-rate-limits/{id}", axum::routing::delete(delete_rate_limit))
        .route("/api-usage-logs", get(list_usage))
        .route("/proxy/statistics", get(proxy_statistics))
}

async fn create_app(
    State(state): State<AppState>,
    Json(req): Json<CreateApiApplication>,
) -> Result<Envelope<ApiApplication>, HubError> {
    Ok(Envelope::ok(state.catalog.create_api_application(req).await?))
}

async fn get_app(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<ApiApplication>, HubError> {
    Ok(Envelope::ok(state.catalog.get_api_application(&id).await?))
}

async fn list_apps(
    State(state): State<AppState>,
    Query(page): Query<Pageable>,
) -> Result<Envelope<Page<ApiApplication>>, HubError> {
    Ok(Envelope::ok(state.catalog.list_api_applications(&page).await?))
}

async fn update_app(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateApiApplication>,
) -> Result<Envelope<ApiApplication>, HubError> {
    Ok(Envelope::ok(
        state.catalog.update_api_application(&id, req).await?,
    ))
}

async fn delete_app(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<()>, HubError> {
    state.catalog.delete_api_application(&id).await?;
    Ok(Envelope::ok_empty())
}

async fn create_interface(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut req): Json<CreateApiInterface>,
) -> Result<Envelope<ApiInterface>, HubError> {
    req.api_application_id = id;
    Ok(Envelope::ok(state.catalog.create_api_interface(req).await?))
}

async fn get_interface(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<ApiInterface>, HubError> {
    Ok(Envelope::ok(state.catalog.get_api_interface(&id).await?))
}

async fn list_interfaces(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(page): Query<Pageable>,
) -> Result<Envelope<Page<ApiInterface>>, HubError> {
    Ok(Envelope::ok(
        state.catalog.list_api_interfaces(&id, &page).await?,
    ))
}

async fn delete_interface(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<()>, HubError> {
    state.catalog.delete_api_interface(&id).await?;
    Ok(Envelope::ok_empty())
}

#[derive(serde::Serialize)]
struct CreatedKey {
    #[serde(flatten)]
    key: ApiKey,
    /// Shown exactly once; only the digest is stored.
    plaintext: String,
}

async fn create_key(
    State(state): State<AppState>,
    Json(req): Json<CreateApiKey>,
) -> Result<Envelope<CreatedKey>, HubError> {
    let (key, plaintext) = state.catalog.create_api_key(req).await?;
    Ok(Envelope::ok(CreatedKey { key, plaintext }))
}

async fn get_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<ApiKey>, HubError> {
    Ok(Envelope::ok(state.catalog.get_api_key(&id).await?))
}

async fn list_keys(
    State(state): State<AppState>,
    Query(page): Query<Pageable>,
) -> Result<Envelope<Page<ApiKey>>, HubError> {
    Ok(Envelope::ok(state.catalog.list_api_keys(&page).await?))
}

async fn delete_key(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<()>, HubError> {
    state.catalog.delete_api_key(&id).await?;
    Ok(Envelope::ok_empty())
}

#[derive(Deserialize)]
struct KeyStatusRequest {
    status: ResourceStatus,
}

async fn set_key_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<KeyStatusRequest>,
) -> Result<Envelope<()>, HubError> {
    state.catalog.set_api_key_status(&id, req.status).await?;
    Ok(Envelope::ok_empty())
}

async fn create_rate_limit(
    State(state): State<AppState>,
    Json(req): Json<CreateApiRateLimit>,
) -> Result<Envelope<ApiRateLimit>, HubError> {
    Ok(Envelope::ok(state.catalog.create_rate_limit(req).await?))
}

async fn delete_rate_limit(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<()>, HubError> {
    state.catalog.delete_rate_limit(&id).await?;
    Ok(Envelope::ok_empty())
}

#[derive(Deserialize)]
struct UsageParams {
    page: Option<u64>,
    size: Option<u64>,
    application_id: Option<String>,
}

async fn list_usage(
    State(state): State<AppState>,
    Query(params): Query<UsageParams>,
) -> Result<Envelope<Page<ApiUsageLog>>, HubError> {
    Ok(Envelope::ok(
        state
            .catalog
            .list_usage_logs(
                &Pageable::of(params.page, params.size),
                params.application_id.as_deref(),
            )
            .await?,
    ))
}

#[derive(serde::Serialize)]
struct ProxyStatistics {
    dropped_usage_logs: u64,
}

async fn proxy_statistics(
    State(state): State<AppState>,
) -> Result<Envelope<ProxyStatistics>, HubError> {
    Ok(Envelope::ok(ProxyStatistics {
        dropped_usage_logs: state.proxy.dropped_logs(),
    }))
}
