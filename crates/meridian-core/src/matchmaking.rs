use serde::{Deserialize, Serialize};

use crate::types::{MinerId, Timestamp};

/// Per-miner cached status consulted by the scorer without touching the
/// full `Miner` record — kept small and cheap to snapshot under a single
/// read-lock acquisition (§5 "Matchmaking reads a snapshot").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchmakingRecord {
    pub miner_id: MinerId,
    pub queue_len: u32,
    pub busy: bool,
    pub avg_latency_ms: f64,
    pub mem_free_gb: u32,
    pub updated_at: Timestamp,
}

/// Weights for the matchmaker's linear scoring function, in the order
/// `(cap_fit, price, latency, trust, load)`. A `Default` implementation
/// supplies the normative weights from §4.4; callers may substitute their
/// own without the scorer depending on how they were chosen (strategy
/// pattern, no runtime dependency on weight provenance).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub cap_fit: f64,
    pub price: f64,
    pub latency: f64,
    pub trust: f64,
    pub load: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        let (cap_fit, price, latency, trust, load) = crate::constants::DEFAULT_SCORING_WEIGHTS;
        Self {
            cap_fit,
            price,
            latency,
            trust,
            load,
        }
    }
}

/// One scored candidate returned by `match`, including the human-readable
/// per-term breakdown required by §4.4's `explain` string.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub miner_id: MinerId,
    pub score: f64,
    pub explain: String,
}
