use std::time::Duration;

use meridian_core::types::Balance;

/// Tunables for a `JobEngine` instance (spec §6: `COORDINATOR_CUT`,
/// `MAX_RETRIES`, the retry-backoff constants, and the chain-side
/// `MIN_FEE` the coordinator pays when relaying a `RECEIPT_CLAIM`).
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Flat protocol fee charged on `submit_job`, on top of `price_ceiling`.
    pub job_fee: Balance,
    /// Coordinator's cut of a completed job's price (spec §4.3 escrow
    /// discipline), distinct from the chain's `COORDINATOR_RATIO` applied
    /// to newly minted tokens (spec §4.5) — the two cuts are configured
    /// independently.
    pub coordinator_cut: f64,
    pub max_retries: u32,
    pub retry_backoff_base_ms: u64,
    pub retry_backoff_max_ms: u64,
    /// Fee the coordinator's relay account pays on every `RECEIPT_CLAIM`
    /// transaction it submits to the chain's mempool.
    pub chain_min_fee: Balance,
    /// How long `poll` blocks waiting for a job to land on a miner before
    /// returning `null` (spec §4.3 "long-poll semantics").
    pub poll_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            job_fee: meridian_core::DEFAULT_MIN_FEE,
            coordinator_cut: meridian_core::DEFAULT_COORDINATOR_CUT,
            max_retries: meridian_core::MAX_RETRIES,
            retry_backoff_base_ms: meridian_core::RETRY_BACKOFF_BASE_MS,
            retry_backoff_max_ms: meridian_core::RETRY_BACKOFF_MAX_MS,
            chain_min_fee: meridian_core::DEFAULT_MIN_FEE,
            poll_timeout: Duration::from_secs(30),
        }
    }
}
