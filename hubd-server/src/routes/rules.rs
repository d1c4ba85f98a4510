//! Rule management, dry-run testing and quality reports.

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use hubd_catalog::model::{CreateRule, QualityReport, Rule, RuleKind, UpdateRule};
use hubd_core::{Envelope, HubError, Page, Pageable, Row};
use hubd_rules::TestRuleOutcome;
use serde::Deserialize;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/rules", get(list).post(create))
        .route("/rules/{id}", get(get_one).put(update).delete(delete))
        .route("/rules/{id}/test", post(test_rule))
        .route("/quality-reports/{object_id}", get(quality_reports))
}

#[derive(Deserialize)]
struct ListParams {
    page: Option<u64>,
    size: Option<u64>,
    kind: Option<RuleKind>,
    #[serde(default)]
    enabled_only: bool,
}

async fn create(
    State(state): State<AppState>,
    Json(req): Json<CreateRule>,
) -> Result<Envelope<Rule>, HubError> {
    Ok(Envelope::ok(state.catalog.create_rule(req).await?))
}

async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<Rule>, HubError> {
    Ok(Envelope::ok(state.catalog.get_rule(&id).await?))
}

async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Envelope<Page<Rule>>, HubError> {
    Ok(Envelope::ok(
        state
            .catalog
            .list_rules(
                &Pageable::of(params.page, params.size),
                params.kind,
                params.enabled_only,
            )
            .await?,
    ))
}

async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateRule>,
) -> Result<Envelope<Rule>, HubError> {
    Ok(Envelope::ok(state.catalog.update_rule(&id, req).await?))
}

async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Envelope<()>, HubError> {
    state.catalog.delete_rule(&id).await?;
    Ok(Envelope::ok_empty())
}

#[derive(Deserialize)]
struct TestRuleRequest {
    sample_rows: Vec<Row>,
}

/// Dry run: returns the transformed sample, persists nothing.
async fn test_rule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<TestRuleRequest>,
) -> Result<Envelope<TestRuleOutcome>, HubError> {
    let rule = state.catalog.get_rule(&id).await?;
    Ok(Envelope::ok(state.rules.test_rule(&rule, req.sample_rows)?))
}

async fn quality_reports(
    State(state): State<AppState>,
    Path(object_id): Path<String>,
    Query(page): Query<Pageable>,
) -> Result<Envelope<Page<QualityReport>>, HubError> {
    Ok(Envelope::ok(
        state.catalog.list_quality_reports(&object_id, &page).await?,
    ))
}
