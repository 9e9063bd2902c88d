use meridian_core::constants::{DEFAULT_TOP_K, TRUST_INELIGIBLE_THRESHOLD};
use meridian_core::matchmaking::{MatchCandidate, ScoringWeights};
use meridian_core::types::Timestamp;
use meridian_storage::Storage;

use crate::error::PoolError;
use crate::scoring::{score_candidates, MatchHints, MatchRequirements};

/// `match(requirements, hints, top_k)` (spec §4.4). Reads a snapshot of
/// online miners and the matchmaking status table under a single query
/// each — a miner update racing this call is resolved in favor of
/// whichever lands first, never a torn read. `now` re-checks the
/// heartbeat grace window at match time rather than trusting `status`
/// alone, which only flips to `Offline` on the next sweep.
#[allow(clippy::too_many_arguments)]
pub async fn find_matches(
    storage: &Storage,
    requirements: MatchRequirements,
    hints: MatchHints,
    top_k: Option<usize>,
    weights: &ScoringWeights,
    now: Timestamp,
) -> Result<Vec<MatchCandidate>, PoolError> {
    let miners = storage.list_online_miners().await?;
    let snapshots = storage.matchmaking_snapshot().await?;

    Ok(score_candidates(
        &miners,
        &snapshots,
        &requirements,
        &hints,
        weights,
        TRUST_INELIGIBLE_THRESHOLD,
        top_k.unwrap_or(DEFAULT_TOP_K),
        now,
    ))
}
