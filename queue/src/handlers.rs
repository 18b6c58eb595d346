use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use common::{AckStatus, JobDispatch, JobRequest, QueueStatus, QueuedJob};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/jobs", get(list_jobs).post(create_job))
        .route("/api/v1/jobs/:uuid", get(get_job))
        .route("/api/v1/forecast/request", get(next_forecast))
        .route("/api/v1/forecast/response/:uuid/:status", get(respond))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/* ---------------- handlers HTTP ---------------- */

async fn health() -> &'static str {
    "ok"
}

fn internal(e: String) -> StatusCode {
    warn!("error interno de la cola: {}", e);
    StatusCode::INTERNAL_SERVER_ERROR
}

// Encola un pedido de pronóstico nuevo
async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<JobRequest>,
) -> Result<Json<QueuedJob>, StatusCode> {
    if req.input_path.trim().is_empty() || req.source.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let job = QueuedJob {
        uuid: uuid::Uuid::new_v4().to_string(),
        request: req,
        status: QueueStatus::Queued,
        submitted_at: Utc::now(),
        dispatched_at: None,
        finished_at: None,
        dispatches: 0,
    };

    state.lock_jobs().map_err(internal)?.push(job.clone());
    info!("job {} encolado ({})", job.uuid, job.request.input_path);

    Ok(Json(job))
}

async fn list_jobs(State(state): State<AppState>) -> Result<Json<Vec<QueuedJob>>, StatusCode> {
    let jobs = state.lock_jobs().map_err(internal)?;
    Ok(Json(jobs.clone()))
}

async fn get_job(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> Result<Json<QueuedJob>, StatusCode> {
    let jobs = state.lock_jobs().map_err(internal)?;

    if let Some(job) = jobs.iter().find(|j| j.uuid == uuid) {
        Ok(Json(job.clone()))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

// Despacha el job QUEUED más viejo; 204 si no hay nada
async fn next_forecast(State(state): State<AppState>) -> Result<Response, StatusCode> {
    let mut jobs = state.lock_jobs().map_err(internal)?;

    let Some(job) = jobs.iter_mut().find(|j| j.status == QueueStatus::Queued) else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };

    job.status = QueueStatus::Dispatched;
    job.dispatched_at = Some(Utc::now());
    job.dispatches += 1;
    info!("despachando job {} (despacho #{})", job.uuid, job.dispatches);

    let dispatch = JobDispatch {
        uuid: job.uuid.clone(),
        dex: job.request.clone(),
    };
    Ok(Json(dispatch).into_response())
}

// Acknowledge del worker: 1 = éxito, 2 = fallo
async fn respond(
    State(state): State<AppState>,
    Path((uuid, status)): Path<(String, String)>,
) -> Result<Json<QueuedJob>, StatusCode> {
    let ack = AckStatus::from_code(&status).ok_or(StatusCode::BAD_REQUEST)?;

    let mut jobs = state.lock_jobs().map_err(internal)?;
    let job = jobs
        .iter_mut()
        .find(|j| j.uuid == uuid)
        .ok_or(StatusCode::NOT_FOUND)?;

    if job.status != QueueStatus::Dispatched {
        warn!("acknowledge de job {} en estado {:?}", job.uuid, job.status);
    }
    job.status = match ack {
        AckStatus::Success => QueueStatus::Succeeded,
        AckStatus::Failure => QueueStatus::Failed,
    };
    job.finished_at = Some(Utc::now());
    info!("job {} terminado: {:?}", job.uuid, job.status);

    Ok(Json(job.clone()))
}
