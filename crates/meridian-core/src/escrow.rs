use serde::{Deserialize, Serialize};

use crate::types::{Address, Balance, JobId};

/// Escrow entry owned exclusively by one `Job` (§3.2). Held at `ASSIGNED`,
/// released atomically with receipt inclusion, refunded on any
/// terminal-failure edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowState {
    Held,
    Released,
    Refunded,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EscrowEntry {
    pub job_id: JobId,
    pub client_addr: Address,
    pub amount: Balance,
    pub state: EscrowState,
}
