//! HTTP control API
//!
//! JSON over `daemon_port`. Errors are `{"error": msg}` with a 4xx/5xx
//! status.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use synco_core::{EndpointKind, JobSnapshot};

use crate::manager::JobManager;
use crate::store::{HistoryStore, JobStore};

const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Shared handles behind every route
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<JobManager>,
    pub job_store: Arc<dyn JobStore>,
    pub history: Arc<dyn HistoryStore>,
    /// Flipped by `POST /stop`; the binary watches it to exit
    pub shutdown: watch::Sender<bool>,
}

/// Build the control router
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/stop", post(handle_stop))
        .route("/jobs", get(handle_list_jobs).post(handle_add_job))
        .route("/jobs/delegate", post(handle_delegate))
        .route("/jobs/{id}", delete(handle_remove_job))
        .route("/jobs/{id}/pause", post(handle_pause_job))
        .route("/jobs/{id}/resume", post(handle_resume_job))
        .route("/history", get(handle_history))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(status: StatusCode, msg: impl ToString) -> Response {
    (status, Json(json!({ "error": msg.to_string() }))).into_response()
}

async fn handle_status(State(state): State<ApiState>) -> Response {
    Json(json!({ "jobs": state.manager.snapshots() })).into_response()
}

async fn handle_stop(State(state): State<ApiState>) -> Response {
    let _ = state.shutdown.send(true);
    Json(json!({ "status": "stopping" })).into_response()
}

async fn handle_list_jobs(State(state): State<ApiState>) -> Response {
    let jobs = match state.job_store.get_all().await {
        Ok(jobs) => jobs,
        Err(err) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, err),
    };

    let running: HashMap<i64, JobSnapshot> = state
        .manager
        .snapshots()
        .into_iter()
        .map(|snap| (snap.job_id, snap))
        .collect();

    Json(json!({ "jobs": jobs, "running": running })).into_response()
}

#[derive(Debug, Deserialize)]
struct AddJobRequest {
    #[serde(default)]
    src: String,
    src_type: EndpointKind,
    #[serde(default)]
    dst: String,
    dst_type: EndpointKind,
}

async fn handle_add_job(
    State(state): State<ApiState>,
    body: Result<Json<AddJobRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return error_response(StatusCode::BAD_REQUEST, "src and dst required");
    };
    if req.src.is_empty() || req.dst.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "src and dst required");
    }

    let job = match state
        .job_store
        .add(req.src_type, &req.src, req.dst_type, &req.dst)
        .await
    {
        Ok(job) => job,
        Err(err) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, err),
    };

    if let Err(err) = state.manager.start_job(&job).await {
        // A job that never started is not kept.
        let _ = state.job_store.delete(job.id).await;
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, err);
    }

    (StatusCode::CREATED, Json(job)).into_response()
}

#[derive(Debug, Deserialize)]
struct DelegateRequest {
    #[serde(default)]
    src: String,
    #[serde(default)]
    push_to: String,
    #[serde(default)]
    node_id: String,
}

async fn handle_delegate(
    State(state): State<ApiState>,
    body: Result<Json<DelegateRequest>, JsonRejection>,
) -> Response {
    let Ok(Json(req)) = body else {
        return error_response(StatusCode::BAD_REQUEST, "src and push_to required");
    };
    if req.src.is_empty() || req.push_to.is_empty() || req.node_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "src and push_to required");
    }

    let jobs = match state.job_store.get_all().await {
        Ok(jobs) => jobs,
        Err(err) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, err),
    };

    // Idempotent on (src, push_to).
    if jobs
        .iter()
        .any(|j| j.src_path == req.src && j.dst_path == req.push_to)
    {
        return Json(json!({ "status": "already exists" })).into_response();
    }

    let job = match state
        .job_store
        .add(
            EndpointKind::Local,
            &req.src,
            EndpointKind::RemoteTcp,
            &req.push_to,
        )
        .await
    {
        Ok(job) => job,
        Err(err) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, err),
    };

    if let Err(err) = state.manager.start_job(&job).await {
        let _ = state.job_store.delete(job.id).await;
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, err);
    }

    info!(
        src = %req.src,
        push_to = %req.push_to,
        requested_by = %req.node_id,
        "delegated job started"
    );

    (StatusCode::CREATED, Json(job)).into_response()
}

async fn handle_remove_job(State(state): State<ApiState>, Path(id): Path<i64>) -> Response {
    let _ = state.manager.stop_job(id);

    if let Err(err) = state.job_store.delete(id).await {
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, err);
    }

    StatusCode::NO_CONTENT.into_response()
}

async fn handle_pause_job(State(state): State<ApiState>, Path(id): Path<i64>) -> Response {
    match state.manager.pause_job(id) {
        Ok(()) => Json(json!({ "status": "paused" })).into_response(),
        Err(err) => error_response(StatusCode::BAD_REQUEST, err),
    }
}

async fn handle_resume_job(State(state): State<ApiState>, Path(id): Path<i64>) -> Response {
    match state.manager.resume_job(id) {
        Ok(()) => Json(json!({ "status": "resumed" })).into_response(),
        Err(err) => error_response(StatusCode::BAD_REQUEST, err),
    }
}

async fn handle_history(
    State(state): State<ApiState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    // An unparsable n keeps the default, it is not an error.
    let limit = params
        .get("n")
        .and_then(|n| n.parse().ok())
        .unwrap_or(DEFAULT_HISTORY_LIMIT);

    match state.history.recent(limit).await {
        Ok(records) => Json(records).into_response(),
        Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, err),
    }
}
