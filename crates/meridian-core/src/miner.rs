use serde::{Deserialize, Serialize};

use crate::types::{Address, Balance, MinerId, Timestamp};

/// Declared hardware/software capabilities of a miner, used for the
/// matchmaker's hard filter and `cap_fit` score term.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MinerCapabilities {
    pub gpu_model: String,
    pub vram_gb: u32,
    pub cpu_cores: u32,
    pub ram_gb: u32,
    pub workload_tags: Vec<String>,
}

/// Connectivity/liveness status tracked by the Pool Hub.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MinerStatus {
    Online,
    Offline,
}

/// A registered compute provider. `api_key_hash` is the only persisted
/// form of the miner's long-lived credential — the plaintext key is never
/// stored (see `meridian-pool`'s `register` for the hashing discipline).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Miner {
    pub miner_id: MinerId,
    pub miner_version: u32,
    pub address: Address,
    pub endpoint_url: String,
    pub api_key_hash: String,
    pub capabilities: MinerCapabilities,
    pub price_per_1k_units: Balance,
    pub max_parallel_slots: u32,
    pub region: Option<String>,
    pub trust_score: f64,
    pub status: MinerStatus,
    pub queue_len: u32,
    pub busy: bool,
    pub last_seen: Timestamp,
    pub registered_at: Timestamp,
}

impl Miner {
    /// A miner below the ineligibility floor is never returned by `match`,
    /// regardless of how well it otherwise scores (§4.4).
    pub fn is_eligible_for_matching(&self, ineligible_floor: f64) -> bool {
        self.status == MinerStatus::Online && self.trust_score >= ineligible_floor
    }

    pub fn apply_trust_delta(&mut self, delta: f64) {
        self.trust_score = (self.trust_score + delta).clamp(0.0, 1.0);
    }
}
