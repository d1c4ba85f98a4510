//! Liveness / readiness probes and the aggregated health view.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
}

#[derive(Serialize)]
#[serde(rename_all = "UPPERCASE")]
enum CheckStatus {
    Up,
    Down,
}

#[derive(Serialize)]
struct Check {
    name: String,
    status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

#[derive(Serialize)]
struct HealthReport {
    status: CheckStatus,
    checks: Vec<Check>,
    uptime_seconds: u64,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = Vec::new();
    let mut all_up = true;

    match state.catalog.ping().await {
        Ok(()) => checks.push(Check {
            name: "catalog".into(),
            status: CheckStatus::Up,
            reason: None,
        }),
        Err(e) => {
            all_up = false;
            checks.push(Check {
                name: "catalog".into(),
                status: CheckStatus::Down,
                reason: Some(e.to_string()),
            });
        }
    }

    let drivers = state.drivers.statistics().await;
    checks.push(Check {
        name: "drivers".into(),
        status: CheckStatus::Up,
        reason: Some(format!(
            "{} instances, {} online, {} with errors",
            drivers.total, drivers.online, drivers.with_errors
        )),
    });

    let report = HealthReport {
        status: if all_up { CheckStatus::Up } else { CheckStatus::Down },
        checks,
        uptime_seconds: state.started_at.elapsed().as_secs(),
    };
    let code = if all_up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(report))
}

async fn live() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    match state.catalog.ping().await {
        Ok(()) => (StatusCode::OK, "READY"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "NOT READY"),
    }
}
