//! HTTP API for `--serve` mode
//!
//! Endpoints:
//! - POST   /batch           start a run (202), or cancel the active one (200)
//! - POST   /batch/cancel    idempotent cancel
//! - GET    /batch/progress  current progress snapshot
//! - GET    /batch/results   last run results, optional `?status=` filter
//! - DELETE /batch           forget the last run (409 while running)
//! - GET    /health
//! - GET    /metrics         Prometheus text format
//!
//! Keys are always masked in responses.

use std::time::Instant;

use axum::Json;
use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use key_pool::{Admission, BatchController, KeyStatus};
use metrics_exporter_prometheus::PrometheusHandle;
use provider::ProviderKind;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::planner::BatchPlanner;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    controller: BatchController,
    planner: BatchPlanner,
    prometheus: PrometheusHandle,
    started_at: Instant,
}

impl ApiState {
    pub fn new(controller: BatchController, planner: BatchPlanner, prometheus: PrometheusHandle) -> Self {
        Self {
            controller,
            planner,
            prometheus,
            started_at: Instant::now(),
        }
    }
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/batch", post(start_batch).delete(clear_batch))
        .route("/batch/cancel", post(cancel_batch))
        .route("/batch/progress", get(batch_progress))
        .route("/batch/results", get(batch_results))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (status, [(CONTENT_TYPE, "application/json")], body.to_string()).into_response()
}

fn error_response(status: StatusCode, kind: &str, message: impl Into<String>) -> Response {
    json_response(
        status,
        json!({ "error": { "type": kind, "message": message.into() } }),
    )
}

/// Keys as one newline-delimited blob or as a list.
#[derive(Deserialize)]
#[serde(untagged)]
enum KeysField {
    Blob(String),
    List(Vec<String>),
}

impl KeysField {
    fn into_blob(self) -> String {
        match self {
            KeysField::Blob(s) => s,
            KeysField::List(keys) => keys.join("\n"),
        }
    }
}

#[derive(Deserialize)]
struct StartBatchRequest {
    keys: KeysField,
    #[serde(default)]
    provider: Option<ProviderKind>,
    #[serde(default)]
    model: Option<String>,
}

/// POST /batch: start a run, or cancel the one in progress.
async fn start_batch(
    State(state): State<ApiState>,
    body: Result<Json<StartBatchRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => {
            return error_response(StatusCode::BAD_REQUEST, "invalid_request", rejection.body_text());
        }
    };

    let request = state
        .planner
        .request(body.keys.into_blob(), body.provider, body.model);

    match state.controller.begin(request) {
        Ok(Admission::Started(prepared)) => {
            let body = json!({
                "status": "started",
                "run_id": prepared.run_id(),
                "total": prepared.total(),
                "duplicates": prepared.duplicates(),
            });
            let controller = state.controller.clone();
            tokio::spawn(async move {
                controller.execute(prepared).await;
            });
            json_response(StatusCode::ACCEPTED, body)
        }
        Ok(Admission::Cancelled { run_id }) => json_response(
            StatusCode::OK,
            json!({ "status": "cancelling", "run_id": run_id }),
        ),
        Err(e) => {
            info!(error = %e, "batch rejected");
            error_response(StatusCode::BAD_REQUEST, "invalid_request", e.to_string())
        }
    }
}

/// POST /batch/cancel
async fn cancel_batch(State(state): State<ApiState>) -> Response {
    let status = if state.controller.cancel() {
        "cancelling"
    } else {
        "idle"
    };
    json_response(StatusCode::OK, json!({ "status": status }))
}

/// GET /batch/progress
async fn batch_progress(State(state): State<ApiState>) -> Response {
    json_response(
        StatusCode::OK,
        json!({
            "running": state.controller.is_running(),
            "progress": state.controller.current_progress(),
        }),
    )
}

#[derive(Deserialize)]
struct ResultsQuery {
    status: Option<String>,
}

/// GET /batch/results?status=valid
async fn batch_results(
    State(state): State<ApiState>,
    Query(query): Query<ResultsQuery>,
) -> Response {
    let filter = match query.status.as_deref().map(str::parse::<KeyStatus>) {
        None => None,
        Some(Ok(status)) => Some(status),
        Some(Err(e)) => return error_response(StatusCode::BAD_REQUEST, "invalid_request", e),
    };

    let Some(summary) = state.controller.last_summary() else {
        return error_response(StatusCode::NOT_FOUND, "not_found", "no finished run");
    };
    let results = state.controller.last_results(filter, false);

    json_response(
        StatusCode::OK,
        json!({ "summary": summary, "results": results }),
    )
}

/// DELETE /batch
async fn clear_batch(State(state): State<ApiState>) -> Response {
    match state.controller.clear() {
        Ok(cleared) => json_response(StatusCode::OK, json!({ "cleared": cleared })),
        Err(e) => {
            warn!(error = %e, "clear refused");
            error_response(StatusCode::CONFLICT, "run_in_progress", e.to_string())
        }
    }
}

/// GET /health
async fn health(State(state): State<ApiState>) -> Response {
    json_response(
        StatusCode::OK,
        json!({
            "status": "healthy",
            "provider": state.planner.default_provider().id(),
            "running": state.controller.is_running(),
            "uptime_seconds": state.started_at.elapsed().as_secs(),
        }),
    )
}

/// GET /metrics
async fn metrics_handler(State(state): State<ApiState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.prometheus.render(),
    )
}
