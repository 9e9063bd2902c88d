use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use meridian_core::job::{Job, JobConstraints, JobPayload};
use meridian_core::receipt::ComputeReceipt;
use meridian_core::types::{Balance, JobId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::auth::authenticate_client;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SubmitJobRequest {
    pub client_nonce: u64,
    pub payload: JobPayload,
    #[serde(default)]
    pub constraints: JobConstraints,
    pub max_price: Balance,
    pub deadline: Timestamp,
}

#[derive(Serialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
}

/// `POST /jobs` (spec §4.7 "Client API key"). Only the coordinator process
/// serves this — `state.job_engine` is `None` everywhere else.
pub async fn submit_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SubmitJobRequest>,
) -> Result<Json<SubmitJobResponse>, AppError> {
    let client_addr = authenticate_client(&headers, &state.jwt_keys)?;
    let engine = job_engine(&state)?;
    let now = now_ts();
    let job_id = engine
        .submit_job(client_addr, req.client_nonce, req.payload, req.constraints, req.max_price, req.deadline, now)
        .await?;
    Ok(Json(SubmitJobResponse { job_id: job_id.to_hex() }))
}

/// `GET /jobs/{id}` (spec §4.7). Rejects lookups for jobs the caller does
/// not own — a client may only ever see its own job's lifecycle.
pub async fn get_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Job>, AppError> {
    let client_addr = authenticate_client(&headers, &state.jwt_keys)?;
    let job_id = JobId::from_hex(&id)?;
    let job = state.storage.get_job(&job_id).await?.ok_or_else(|| AppError::not_found(format!("no job {id}")))?;
    if job.client_addr != client_addr {
        return Err(AppError::auth("job does not belong to caller"));
    }
    Ok(Json(job))
}

/// `GET /jobs/{id}/receipt` (spec §4.7) — only available once the job has
/// reached `COMPLETED` and a receipt was minted for it.
pub async fn get_job_receipt(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ComputeReceipt>, AppError> {
    let client_addr = authenticate_client(&headers, &state.jwt_keys)?;
    let job_id = JobId::from_hex(&id)?;
    let job = state.storage.get_job(&job_id).await?.ok_or_else(|| AppError::not_found(format!("no job {id}")))?;
    if job.client_addr != client_addr {
        return Err(AppError::auth("job does not belong to caller"));
    }
    state
        .storage
        .get_receipt_by_job(&job_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("job has no receipt yet"))
}

/// `POST /jobs/{id}/cancel` (spec §4.3 "cancel ... only valid while
/// QUEUED"). Not listed as its own bullet in §4.7's route table, but every
/// other state transition the engine exposes has a route — cancellation
/// is the one client-initiated transition and needs one too.
pub async fn cancel_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let client_addr = authenticate_client(&headers, &state.jwt_keys)?;
    let job_id = JobId::from_hex(&id)?;
    let engine = job_engine(&state)?;
    engine.cancel(&job_id, &client_addr, now_ts()).await?;
    Ok(Json(serde_json::json!({ "cancelled": true })))
}

fn job_engine(state: &AppState) -> Result<&meridian_coordinator::JobEngine, AppError> {
    state
        .job_engine
        .as_deref()
        .ok_or_else(|| AppError::new(meridian_core::ErrKind::Dependency, "this node does not run the job engine"))
}

fn now_ts() -> Timestamp {
    chrono::Utc::now().timestamp()
}
