// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! HTTP API
//!
//! Every response is an envelope `{data, meta, errors}`. Failures carry
//! `data: null` and one `{kind, message, detail}` entry, with the status
//! taken from [`PlanError::status`].

use anyhow::{Context, Result};
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::PlanError;
use crate::service::{ExportRunRequest, PlanService};
use crate::telemetry;

/// One error entry of the envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    /// Taxonomy name
    pub kind: String,
    /// Human message
    pub message: String,
    /// Structured detail
    #[serde(default)]
    pub detail: Value,
}

/// Response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Payload, `null` on failure
    pub data: Option<T>,
    /// Request metadata
    pub meta: Value,
    /// Errors, empty on success
    pub errors: Vec<ApiErrorBody>,
}

fn ok<T: Serialize>(data: T, meta: Value) -> Json<Envelope<T>> {
    Json(Envelope {
        data: Some(data),
        meta,
        errors: Vec::new(),
    })
}

/// Error half of every handler
#[derive(Debug)]
pub struct ApiError(PlanError);

impl From<PlanError> for ApiError {
    fn from(err: PlanError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(PlanError::InvalidInput(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(PlanError::InvalidInput(rejection.body_text()))
    }
}

fn detail(err: &PlanError) -> Value {
    match err {
        PlanError::NotFound { what, key } => json!({ "what": what, "key": key }),
        PlanError::KindConflict { name, existing, requested } => {
            json!({ "overlay": name, "existing": existing, "requested": requested })
        }
        PlanError::OverlayKind { name, expected, actual } => {
            json!({ "overlay": name, "expected": expected, "actual": actual })
        }
        PlanError::DependencyTimeout { dependency, budget } => {
            json!({ "source": dependency, "budget_ms": budget.as_millis() as u64 })
        }
        PlanError::DependencyUnavailable { dependency, reason } => json!({ "source": dependency, "reason": reason }),
        PlanError::Busy { plan_key, name } => json!({ "plan_key": plan_key, "overlay": name }),
        PlanError::InvalidDecision(value) => json!({ "value": value }),
        PlanError::InvalidInput(_) | PlanError::Storage(_) => Value::Null,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::warn!(kind = err.kind(), error = %err, "request failed");
        } else {
            tracing::debug!(kind = err.kind(), error = %err, "request rejected");
        }
        let body = Envelope::<Value> {
            data: None,
            meta: json!({}),
            errors: vec![ApiErrorBody {
                kind: err.kind().to_string(),
                message: err.to_string(),
                detail: detail(&err),
            }],
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<Envelope<T>>, ApiError>;

type AppState = Arc<PlanService>;

#[derive(Debug, Default, Deserialize)]
struct OverlayQuery {
    overlay: Option<String>,
}

impl OverlayQuery {
    fn selected(&self) -> Option<&str> {
        self.overlay.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    fn required(&self) -> Result<&str, PlanError> {
        self.selected()
            .ok_or_else(|| PlanError::InvalidInput("query parameter 'overlay' is required".into()))
    }
}

#[derive(Debug, Default, Deserialize)]
struct ApplyRunQuery {
    run: Option<String>,
    overlay: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DecisionBody {
    candidate_key: String,
    decision: String,
    #[serde(default)]
    rationale: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExistingDecisionBody {
    test_key: String,
    disposition: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateBody {
    jira_key: String,
}

async fn health() -> Json<Envelope<Value>> {
    ok(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }), json!({}))
}

/// Prometheus text exposition, outside the JSON envelope
async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        telemetry::render(),
    )
}

async fn diag_config(State(service): State<AppState>) -> ApiResult<Value> {
    Ok(ok(service.diagnostics()?, json!({})))
}

async fn issue_keys(State(service): State<AppState>) -> ApiResult<Vec<String>> {
    let keys = service.issue_keys().await?;
    let meta = json!({ "count": keys.len() });
    Ok(ok(keys, meta))
}

async fn list_plans(
    State(service): State<AppState>,
    query: Result<Query<OverlayQuery>, QueryRejection>,
) -> ApiResult<Vec<crate::service::PlanListing>> {
    let Query(query) = query?;
    let plans = service.list_plans(query.selected()).await?;
    let meta = json!({ "count": plans.len(), "overlay": query.selected() });
    Ok(ok(plans, meta))
}

async fn list_overlays(State(service): State<AppState>) -> ApiResult<Vec<crate::types::OverlaySummary>> {
    let overlays = service.overlays()?;
    let meta = json!({ "count": overlays.len() });
    Ok(ok(overlays, meta))
}

async fn get_plan(
    State(service): State<AppState>,
    Path(key): Path<String>,
    query: Result<Query<OverlayQuery>, QueryRejection>,
) -> ApiResult<crate::service::PlanView> {
    let Query(query) = query?;
    let view = service.plan(&key, query.selected()).await?;
    let meta = json!({
        "plan_key": view.plan.key,
        "overlay": query.selected(),
        "overlay_kind": view.overlay_kind,
    });
    Ok(ok(view, meta))
}

async fn enrich(
    State(service): State<AppState>,
    Path(key): Path<String>,
    query: Result<Query<OverlayQuery>, QueryRejection>,
) -> ApiResult<crate::types::FileOverlay> {
    let Query(query) = query?;
    let overlay = query.required()?;
    let file = service.enrich(&key, overlay).await?;
    Ok(ok(file, json!({ "plan_key": key, "overlay": overlay, "overlay_kind": "file" })))
}

async fn apply_run(
    State(service): State<AppState>,
    Path(key): Path<String>,
    query: Result<Query<ApplyRunQuery>, QueryRejection>,
) -> ApiResult<crate::types::FileOverlay> {
    let Query(query) = query?;
    let run = query
        .run
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PlanError::InvalidInput("query parameter 'run' is required".into()))?;
    let overlay = query
        .overlay
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PlanError::InvalidInput("query parameter 'overlay' is required".into()))?;
    let file = service.apply_run(&key, run, overlay).await?;
    let meta = json!({
        "plan_key": key,
        "run": run,
        "overlay": overlay,
        "pending": file.pending_count(),
    });
    Ok(ok(file, meta))
}

async fn candidate_decision(
    State(service): State<AppState>,
    Path(key): Path<String>,
    query: Result<Query<OverlayQuery>, QueryRejection>,
    body: Result<Json<DecisionBody>, JsonRejection>,
) -> ApiResult<crate::types::FileOverlay> {
    let Query(query) = query?;
    let Json(body) = body?;
    let overlay = query.required()?;
    let file = service
        .set_decision(&key, overlay, &body.candidate_key, &body.decision, body.rationale)
        .await?;
    let status = crate::types::GovernanceStatus::of_file(&file);
    let meta = json!({ "plan_key": key, "overlay": overlay, "candidate_key": body.candidate_key, "status": status });
    Ok(ok(file, meta))
}

async fn existing_decision(
    State(service): State<AppState>,
    Path(key): Path<String>,
    query: Result<Query<OverlayQuery>, QueryRejection>,
    body: Result<Json<ExistingDecisionBody>, JsonRejection>,
) -> ApiResult<crate::types::FileOverlay> {
    let Query(query) = query?;
    let Json(body) = body?;
    let overlay = query.required()?;
    let file = service
        .set_existing(&key, overlay, &body.test_key, &body.disposition, body.reason)
        .await?;
    let meta = json!({ "plan_key": key, "overlay": overlay, "test_key": body.test_key });
    Ok(ok(file, meta))
}

async fn effective(
    State(service): State<AppState>,
    Path(key): Path<String>,
    query: Result<Query<OverlayQuery>, QueryRejection>,
) -> ApiResult<crate::types::EffectivePlan> {
    let Query(query) = query?;
    let plan = service.effective(&key, query.selected()).await?;
    let meta = json!({
        "plan_key": plan.plan_key,
        "overlay": plan.overlay,
        "overlay_kind": plan.overlay_kind,
        "binding": plan.binding,
        "status": plan.status,
    });
    Ok(ok(plan, meta))
}

async fn generate(
    State(service): State<AppState>,
    body: Result<Json<GenerateBody>, JsonRejection>,
) -> ApiResult<crate::llm::TestPlanResponse> {
    let Json(body) = body?;
    let response = service.generate(&body.jira_key).await?;
    let meta = json!({ "provider": response.provider, "model": response.model, "suggestions": response.suggestions.len() });
    Ok(ok(response, meta))
}

async fn export_run(
    State(service): State<AppState>,
    Path(jira_key): Path<String>,
    body: Result<Json<ExportRunRequest>, JsonRejection>,
) -> ApiResult<crate::service::ExportOutcome> {
    let Json(body) = body?;
    let outcome = service.export_run(&jira_key, body).await?;
    let meta = json!({ "jira_key": outcome.jira_key, "overlay_kind": "run" });
    Ok(ok(outcome, meta))
}

async fn list_runs(State(service): State<AppState>) -> ApiResult<Vec<crate::store::RunSummary>> {
    let runs = service.runs()?;
    let meta = json!({ "count": runs.len() });
    Ok(ok(runs, meta))
}

async fn fallback() -> ApiError {
    ApiError(PlanError::not_found("route", "no such endpoint"))
}

/// Router over a shared service
pub fn build_router(service: Arc<PlanService>) -> Router {
    telemetry::install();
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/api/diag/config", get(diag_config))
        .route("/api/jira/issue-keys", get(issue_keys))
        .route("/api/test-plans", get(list_plans))
        .route("/api/test-plans/overlays", get(list_overlays))
        .route("/api/test-plans/{key}", get(get_plan))
        .route("/api/test-plans/{key}/enrich", post(enrich))
        .route("/api/test-plans/{key}/apply-run", post(apply_run))
        .route("/api/test-plans/{key}/candidates/decision", post(candidate_decision))
        .route("/api/test-plans/{key}/existing-tests/decision", post(existing_decision))
        .route("/api/test-plans/{key}/effective", get(effective))
        .route("/agent/test-plan", post(generate))
        .route("/api/junction/runs", get(list_runs))
        .route("/api/junction/runs/{jira_key}", post(export_run))
        .fallback(fallback)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(service)
}

/// Serve until Ctrl-C
pub async fn serve(service: Arc<PlanService>) -> Result<()> {
    let bind = service.config().bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    tracing::info!(addr = %bind, data_dir = %service.config().data_dir.display(), "qaplan listening");
    axum::serve(listener, build_router(service))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await
        .context("HTTP server failed")
}
