use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use super::error::ApiError;
use super::extract::TenantContext;
use super::{openapi, AppState};
use crate::domain::{GovernanceRecord, RecordStatus};
use crate::metrics::export_metrics;
use crate::scoring::{AuditTemplate, Responses};
use crate::service::{ApprovalOutcome, RecordHistory, TransitionOutcome};
use crate::storage::AuditResult;
use crate::workflow::Decision;

#[derive(Debug, Deserialize)]
pub struct TransitionBody {
    pub to: RecordStatus,
    #[serde(default)]
    pub reason: String,
    /// Merged into the record before the transition guards run.
    #[serde(default)]
    pub attributes: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct DecisionBody {
    pub decision: Decision,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScoreBody {
    pub template: AuditTemplate,
    pub responses: Responses,
    #[serde(default)]
    pub record_id: Option<Uuid>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScoreParams {
    #[serde(default)]
    pub strict: bool,
}

pub async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// Ready when the record store answers; cache and queue are reported only.
pub async fn readyz(State(state): State<AppState>) -> Response {
    let service = &state.service;

    let database = service.store().ping().await;
    if let Err(e) = &database {
        warn!(error = %e, "Readiness: record store unavailable");
    }
    let cache = service.cache().probe().await;
    let queue = service.jobs().ping().await;
    if let Err(e) = &queue {
        warn!(error = %e, "Readiness: job queue unavailable");
    }

    let ready = database.is_ok();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = json!({
        "status": if ready { "ready" } else { "not_ready" },
        "database": if database.is_ok() { "ok" } else { "unavailable" },
        "cache": cache.as_str(),
        "queue": if queue.is_ok() { "ok" } else { "unavailable" },
    });
    (status, Json(body)).into_response()
}

pub async fn metrics(State(state): State<AppState>) -> Response {
    let service = &state.service;
    service.metrics().record_cache_stats(&service.cache().stats());
    match service.jobs().stats().await {
        Ok(stats) => service.metrics().set_queue_depth(&stats),
        Err(e) => warn!(error = %e, "Failed to read queue stats for metrics"),
    }

    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        export_metrics(),
    )
        .into_response()
}

pub async fn openapi_json() -> Json<Value> {
    Json(openapi::document())
}

pub async fn get_record(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
) -> Result<Json<GovernanceRecord>, ApiError> {
    let id = parse_record_id(&id)?;
    let record = state.service.get_record(&ctx.tenant, id).await?;
    Ok(Json(record))
}

pub async fn list_transitions(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
) -> Result<Json<RecordHistory>, ApiError> {
    let id = parse_record_id(&id)?;
    let history = state.service.history(&ctx.tenant, id).await?;
    Ok(Json(history))
}

pub async fn transition(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
    body: Result<Json<TransitionBody>, JsonRejection>,
) -> Result<Json<TransitionOutcome>, ApiError> {
    let id = parse_record_id(&id)?;
    let actor = ctx.require_actor()?;
    let Json(body) = body?;

    let outcome = state
        .service
        .transition(&ctx.tenant, id, body.to, actor, &body.reason, body.attributes)
        .await?;
    Ok(Json(outcome))
}

pub async fn decide_approval(
    State(state): State<AppState>,
    ctx: TenantContext,
    Path(id): Path<String>,
    body: Result<Json<DecisionBody>, JsonRejection>,
) -> Result<Json<ApprovalOutcome>, ApiError> {
    let id = parse_record_id(&id)?;
    let actor = ctx.require_actor()?;
    let Json(body) = body?;

    let outcome = state
        .service
        .decide_approval(&ctx.tenant, id, actor, body.decision, body.comment)
        .await?;
    Ok(Json(outcome))
}

pub async fn score_audit(
    State(state): State<AppState>,
    ctx: TenantContext,
    params: Result<Query<ScoreParams>, QueryRejection>,
    body: Result<Json<ScoreBody>, JsonRejection>,
) -> Result<Json<AuditResult>, ApiError> {
    let actor = ctx.require_actor()?;
    let Query(params) = params?;
    let Json(body) = body?;

    let result = state
        .service
        .score_audit(
            &ctx.tenant,
            &body.template,
            &body.responses,
            params.strict,
            body.record_id,
            actor,
        )
        .await?;
    Ok(Json(result))
}

pub async fn fallback() -> ApiError {
    ApiError::not_found("route not found")
}

fn parse_record_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| {
        ApiError::not_found(format!("Record {} not found", raw)).with_details(json!({ "record_id": raw }))
    })
}
