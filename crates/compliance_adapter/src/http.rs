#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use compliance_kernel_contracts::object::{ConfigObject, LabelSelector};
use compliance_kernel_contracts::run::{Run, RunName, RunSpec};
use compliance_kernel_contracts::Deadline;
use compliance_os::run_controller::RUN_LABEL;
use compliance_storage::{ResourceStore, StorageError};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::metrics::ReconcileMetrics;
use crate::queue::WorkQueue;
use crate::worker::{enqueue_event, RunEvent};

const API_CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ResourceStore>,
    pub queue: Arc<WorkQueue>,
    pub metrics: Arc<ReconcileMetrics>,
    pub ready: Arc<AtomicBool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StatusResponse {
    fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            reason: None,
        }
    }

    fn error(reason: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRunRequest {
    pub metadata: CreateRunMeta,
    #[serde(default)]
    pub spec: RunSpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRunMeta {
    pub name: String,
}

/// Probes and the run API.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/v1/runs", post(create_run))
        .route("/v1/runs/:name", get(get_run))
        .route("/v1/runs/:name/config-objects", get(list_run_config_objects))
        .with_state(state)
}

pub fn build_metrics_router(metrics: Arc<ReconcileMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}

async fn healthz() -> Json<StatusResponse> {
    Json(StatusResponse::ok())
}

async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<StatusResponse>) {
    if state.ready.load(Ordering::Acquire) && !state.queue.is_shutting_down() {
        (StatusCode::OK, Json(StatusResponse::ok()))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(StatusResponse::error("workers not running")),
        )
    }
}

async fn render_metrics(State(metrics): State<Arc<ReconcileMetrics>>) -> Response {
    match metrics.render() {
        Ok(text) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], text).into_response(),
        Err(err) => {
            warn!(error = %err, "failed to render metrics");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

async fn create_run(
    State(state): State<AppState>,
    Json(request): Json<CreateRunRequest>,
) -> Response {
    let run = match RunName::new(request.metadata.name)
        .and_then(|name| Run::v1(name, request.spec))
    {
        Ok(run) => run,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };
    let created = match state.store.create_run(run, Deadline::after(API_CALL_TIMEOUT)) {
        Ok(created) => created,
        Err(err) => return storage_error_response(err),
    };
    if let Err(err) = enqueue_event(&state.queue, &RunEvent::Create(created.name().clone())) {
        warn!(run = %created.name(), error = %err, "created run was not enqueued");
    }
    (StatusCode::CREATED, Json(created)).into_response()
}

async fn get_run(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    let name = match RunName::new(name) {
        Ok(name) => name,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };
    match state.store.get_run(&name, Deadline::after(API_CALL_TIMEOUT)) {
        Ok(run) => (StatusCode::OK, Json(run)).into_response(),
        Err(err) => storage_error_response(err),
    }
}

/// Config objects generated for the run, found by its uid label.
async fn list_run_config_objects(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Response {
    let name = match RunName::new(name) {
        Ok(name) => name,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, err.to_string()),
    };
    let deadline = Deadline::after(API_CALL_TIMEOUT);
    let run = match state.store.get_run(&name, deadline) {
        Ok(run) => run,
        Err(err) => return storage_error_response(err),
    };
    let Some(uid) = run.metadata.uid else {
        return (StatusCode::OK, Json(Vec::<ConfigObject>::new())).into_response();
    };
    let selector = LabelSelector::new().with(RUN_LABEL, uid.as_str());
    match state.store.list_config_objects(None, &selector, deadline) {
        Ok(objects) => (StatusCode::OK, Json(objects)).into_response(),
        Err(err) => storage_error_response(err),
    }
}

fn storage_error_response(err: StorageError) -> Response {
    let status = match &err {
        StorageError::NotFound { .. } => StatusCode::NOT_FOUND,
        StorageError::DuplicateKey { .. } | StorageError::Conflict { .. } => StatusCode::CONFLICT,
        StorageError::ContractViolation(_) => StatusCode::BAD_REQUEST,
        StorageError::DeadlineExceeded { .. } => StatusCode::GATEWAY_TIMEOUT,
        StorageError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
    };
    error_response(status, err.to_string())
}

fn error_response(status: StatusCode, reason: String) -> Response {
    (status, Json(StatusResponse::error(reason))).into_response()
}
