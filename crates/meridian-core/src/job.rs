use serde::{Deserialize, Serialize};

use crate::types::{Address, Balance, JobId, MinerId, Nonce, PaymentId, ReceiptId, Timestamp};

/// Current position of a `Job` in its lifecycle.
///
/// `QUEUED → ASSIGNED → RUNNING → COMPLETED` is the happy path; `FAILED`,
/// `EXPIRED`, and `CANCELLED` are the side-branches. All four are
/// terminal — once reached, no further transition is accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Assigned,
    Running,
    Completed,
    Failed,
    Expired,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Expired | JobState::Cancelled
        )
    }
}

/// Escrow state for a `Job`'s held funds. Transitions are monotonic:
/// `held → released` or `held → refunded`, never back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Held,
    Released,
    Refunded,
}

/// Hard constraints a candidate miner must satisfy to be eligible for a job.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JobConstraints {
    pub min_vram_gb: u32,
    pub min_ram_gb: u32,
    pub tags: Vec<String>,
    pub region: Option<String>,
}

/// The compute payload a client is requesting be executed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobPayload {
    pub model: String,
    pub prompt: String,
    /// Free-form model/runtime parameters (temperature, max_tokens, ...).
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Output reported by a miner on `submit_result`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobResult {
    pub output_hash: [u8; 32],
    pub compute_units: u64,
    #[serde(default)]
    pub metrics: serde_json::Value,
}

/// A unit of compute requested by a client, tracked through its full
/// lifecycle. Fields added after `job_version: 1` must be
/// `#[serde(default)]` so older rows deserialize cleanly during a rolling
/// upgrade.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub job_id: JobId,
    pub job_version: u32,
    pub client_addr: Address,
    pub client_nonce: u64,
    pub payload: JobPayload,
    pub constraints: JobConstraints,
    pub price_ceiling: Balance,
    pub deadline: Timestamp,
    pub state: JobState,
    pub assigned_miner: Option<MinerId>,
    pub result: Option<JobResult>,
    pub receipt_id: Option<ReceiptId>,
    pub payment_id: Option<PaymentId>,
    pub payment_state: PaymentState,
    pub retry_count: u32,
    pub created_at: Timestamp,
    pub assigned_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub progress_pct: Option<u8>,
    pub last_progress_at: Option<Timestamp>,
}

impl Job {
    /// `receipt_id` must be non-null iff the job is `COMPLETED` (§3.1
    /// invariant). Used by storage-layer consistency checks and tests.
    pub fn receipt_invariant_holds(&self) -> bool {
        (self.state == JobState::Completed) == self.receipt_id.is_some()
    }
}
