use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use meridian_core::job::{Job, JobResult};
use meridian_core::matchmaking::{MatchCandidate, ScoringWeights};
use meridian_core::miner::MinerCapabilities;
use meridian_core::receipt::ComputeReceipt;
use meridian_core::types::{Address, Balance, MinerId, Timestamp};
use meridian_pool::{HeartbeatStatus, Lease, MatchHints, MatchRequirements, RegistrationRequest};
use serde::{Deserialize, Serialize};

use crate::auth::{miner_api_key, session_token};
use crate::error::AppError;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub miner_id: String,
    pub address: String,
    pub endpoint_url: String,
    pub capabilities: MinerCapabilities,
    pub price_per_1k_units: Balance,
    pub max_parallel_slots: u32,
    #[serde(default)]
    pub region: Option<String>,
}

/// `POST /miner/register` (spec §4.7 "Miner API key"). Served by the
/// pool-hub process — the only one that owns `meridian_pool`'s registry.
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<Lease>, AppError> {
    let api_key = miner_api_key(&headers)?;
    let request = RegistrationRequest {
        miner_id: MinerId::from_hex(&req.miner_id)?,
        address: Address::from_b58(&req.address)?,
        endpoint_url: req.endpoint_url,
        capabilities: req.capabilities,
        price_per_1k_units: req.price_per_1k_units,
        max_parallel_slots: req.max_parallel_slots,
        region: req.region,
    };
    let lease = meridian_pool::register(&state.storage, request, api_key, now_ts()).await?;
    Ok(Json(lease))
}

/// `POST /miner/heartbeat` (spec §4.4/§4.7). Identified by session token,
/// not API key — the lease issued at registration.
pub async fn heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(status): Json<HeartbeatStatus>,
) -> Result<Json<serde_json::Value>, AppError> {
    let token = session_token(&headers)?;
    meridian_pool::heartbeat(&state.storage, token, status, now_ts()).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
}

#[derive(Deserialize)]
pub struct MatchQuery {
    pub min_vram_gb: Option<u32>,
    pub min_ram_gb: Option<u32>,
    pub max_price: Balance,
    #[serde(default)]
    pub tags: Vec<String>,
    pub region: Option<String>,
    pub top_k: Option<usize>,
}

#[derive(Serialize)]
pub struct MatchResponse {
    pub candidates: Vec<MatchCandidate>,
}

/// `POST /match` (spec §5, rate-limited separately from the default
/// bucket but not itself listed in §4.7's route table). Served on the
/// pool-hub's router, unauthenticated like the chain's other read-only
/// discovery routes — matching is advisory, the coordinator still
/// re-validates eligibility at `assign` time against live storage state.
pub async fn find_match(
    State(state): State<AppState>,
    Json(query): Json<MatchQuery>,
) -> Result<Json<MatchResponse>, AppError> {
    let requirements = MatchRequirements {
        constraints: meridian_core::job::JobConstraints {
            min_vram_gb: query.min_vram_gb.unwrap_or(0),
            min_ram_gb: query.min_ram_gb.unwrap_or(0),
            tags: query.tags,
            region: query.region.clone(),
        },
        max_price: query.max_price,
    };
    let hints = MatchHints { region: query.region };
    let candidates = meridian_pool::find_matches(
        &state.storage,
        requirements,
        hints,
        query.top_k,
        &ScoringWeights::default(),
        now_unix(),
    )
    .await?;
    Ok(Json(MatchResponse { candidates }))
}

fn now_unix() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as Timestamp
}

#[derive(Deserialize)]
pub struct PollQuery {
    pub miner_id: String,
}

/// `POST /miner/poll` (spec §4.3/§4.7) — long-polls for the miner's next
/// assigned job. Served only by the coordinator process.
pub async fn poll(
    State(state): State<AppState>,
    Query(q): Query<PollQuery>,
) -> Result<Json<Option<Job>>, AppError> {
    let engine = job_engine(&state)?;
    let miner_id = MinerId::from_hex(&q.miner_id)?;
    let job = engine.poll(&miner_id, now_ts()).await?;
    Ok(Json(job))
}

#[derive(Deserialize)]
pub struct SubmitResultRequest {
    pub miner_id: String,
    pub job_id: String,
    pub result: JobResult,
}

/// `POST /miner/result` (spec §4.3/§4.7) — the miner's terminal delivery
/// call, minting a `ComputeReceipt` on success.
pub async fn submit_result(
    State(state): State<AppState>,
    Json(req): Json<SubmitResultRequest>,
) -> Result<Json<ComputeReceipt>, AppError> {
    let engine = job_engine(&state)?;
    let miner_id = MinerId::from_hex(&req.miner_id)?;
    let job_id = meridian_core::types::JobId::from_hex(&req.job_id)?;
    let receipt = engine.submit_result(&job_id, &miner_id, req.result, now_ts()).await?;
    Ok(Json(receipt))
}

#[derive(Deserialize)]
pub struct ReportFailureRequest {
    pub miner_id: String,
    pub job_id: String,
    pub reason: FailureReasonWire,
}

#[derive(Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReasonWire {
    NetworkFailure,
    MinerReported,
}

/// `POST /miner/failure` (spec §4.3 "Failure semantics"). The
/// `InvalidResult` variant of `FailureReason` is never accepted from the
/// wire — it is only ever derived internally by `submit_result` itself.
pub async fn report_failure(
    State(state): State<AppState>,
    Json(req): Json<ReportFailureRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let engine = job_engine(&state)?;
    let miner_id = MinerId::from_hex(&req.miner_id)?;
    let job_id = meridian_core::types::JobId::from_hex(&req.job_id)?;
    let reason = match req.reason {
        FailureReasonWire::NetworkFailure => meridian_coordinator::FailureReason::NetworkFailure,
        FailureReasonWire::MinerReported => meridian_coordinator::FailureReason::MinerReported,
    };
    engine.report_failure(&job_id, &miner_id, reason, now_ts()).await?;
    Ok(Json(serde_json::json!({ "ok": true })))
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
