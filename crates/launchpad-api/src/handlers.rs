//! REST API handlers.
//!
//! Writes go through the `Orchestrator`; reads come straight from its
//! `StateStore`. Every JSON response uses the same envelope.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};

use launchpad_metrics::{ReleaseSnapshot, render_prometheus};
use launchpad_release::{ReleaseError, ReleaseOutcome, ReleaseRequest};

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }

    /// A refusal that still carries a body, e.g. the rejection reasons.
    fn refused(data: T, msg: String) -> Json<Self> {
        Json(Self {
            success: false,
            data: Some(data),
            error: Some(msg),
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn release_error(e: &ReleaseError) -> Response {
    let status = match e {
        ReleaseError::NotFound(_) => StatusCode::NOT_FOUND,
        ReleaseError::AlreadyTerminal { .. } => StatusCode::CONFLICT,
        ReleaseError::Plan(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ReleaseError::State(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(&e.to_string(), status)
}

// ── Releases ───────────────────────────────────────────────────

/// POST /api/v1/releases
pub async fn submit_release(
    State(state): State<ApiState>,
    Json(req): Json<ReleaseRequest>,
) -> impl IntoResponse {
    let outcome = match state.orchestrator.submit(req).await {
        Ok(outcome) => outcome,
        Err(e) => return release_error(&e),
    };
    match &outcome {
        ReleaseOutcome::Accepted { execution_id } => {
            info!(execution = %execution_id, "release accepted");
            (StatusCode::ACCEPTED, ApiResponse::ok(outcome)).into_response()
        }
        ReleaseOutcome::Rejected { reasons, .. } => {
            let msg = reasons.join("; ");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiResponse::refused(outcome, msg),
            )
                .into_response()
        }
        ReleaseOutcome::ExecutionInProgress {
            namespace,
            execution_id,
        } => {
            let msg = format!("namespace {namespace} is busy with execution {execution_id}");
            (StatusCode::CONFLICT, ApiResponse::refused(outcome, msg)).into_response()
        }
    }
}

/// Query string of the list endpoint.
#[derive(Debug, Default, serde::Deserialize)]
pub struct ListQuery {
    pub namespace: Option<String>,
}

/// GET /api/v1/releases
pub async fn list_releases(
    State(state): State<ApiState>,
    Query(query): Query<ListQuery>,
) -> impl IntoResponse {
    match state.orchestrator.list(query.namespace.as_deref()) {
        Ok(executions) => ApiResponse::ok(executions).into_response(),
        Err(e) => release_error(&e),
    }
}

/// GET /api/v1/releases/:id
pub async fn get_release(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.get(&id) {
        Ok(execution) => ApiResponse::ok(execution).into_response(),
        Err(e) => release_error(&e),
    }
}

/// POST /api/v1/releases/:id/abort
pub async fn abort_release(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.abort(&id).await {
        Ok(execution) => ApiResponse::ok(execution).into_response(),
        Err(e) => release_error(&e),
    }
}

/// GET /api/v1/releases/:id/smoke
pub async fn list_smoke_results(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if let Err(e) = state.orchestrator.get(&id) {
        return release_error(&e);
    }
    match state.orchestrator.store().list_smoke_results(&id) {
        Ok(results) => ApiResponse::ok(results).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

// ── Artifacts and namespaces ───────────────────────────────────

/// GET /api/v1/artifacts/:id/reports
pub async fn list_reports(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.store().list_reports_for_artifact(&id) {
        Ok(reports) => ApiResponse::ok(reports).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// GET /api/v1/namespaces/:ns/live
pub async fn get_live_version(
    State(state): State<ApiState>,
    Path(ns): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator.store().get_live_version(&ns) {
        Ok(Some(live)) => ApiResponse::ok(live).into_response(),
        Ok(None) => error_response("no live version", StatusCode::NOT_FOUND),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = match ReleaseSnapshot::collect(state.orchestrator.store()) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(error = %e, "failed to collect release snapshot");
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR);
        }
    };

    let body = render_prometheus(&snapshot);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}
