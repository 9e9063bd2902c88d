use meridian_core::constants::HEARTBEAT_GRACE_SEC;
use meridian_core::job::JobConstraints;
use meridian_core::matchmaking::{MatchCandidate, MatchmakingRecord, ScoringWeights};
use meridian_core::miner::Miner;
use meridian_core::types::{Balance, Timestamp};

/// Matchmaking request shape (spec §4.4 `match(requirements, hints, top_k)`).
/// `requirements` come from the job; `hints` are soft guidance the caller
/// may omit.
#[derive(Clone, Debug)]
pub struct MatchRequirements {
    pub constraints: JobConstraints,
    pub max_price: Balance,
}

#[derive(Clone, Debug, Default)]
pub struct MatchHints {
    pub region: Option<String>,
}

/// `vram ≥ min_vram`, `ram ≥ min_ram`, capability superset, region match
/// (if hinted), `price ≤ max_price`, `queue_len < max_parallel`, and
/// `last_seen` within grace — every clause must hold (spec §4.4 "hard
/// filter first").
pub fn passes_hard_filter(
    miner: &Miner,
    req: &MatchRequirements,
    hints: &MatchHints,
    ineligible_trust_floor: f64,
    now: Timestamp,
) -> bool {
    if !miner.is_eligible_for_matching(ineligible_trust_floor) {
        return false;
    }
    if now - miner.last_seen > HEARTBEAT_GRACE_SEC {
        return false;
    }
    if miner.capabilities.vram_gb < req.constraints.min_vram_gb {
        return false;
    }
    if miner.capabilities.ram_gb < req.constraints.min_ram_gb {
        return false;
    }
    if !req
        .constraints
        .tags
        .iter()
        .all(|t| miner.capabilities.workload_tags.contains(t))
    {
        return false;
    }
    if let (Some(hinted), Some(declared)) = (&hints.region, &miner.region) {
        if hinted != declared {
            return false;
        }
    }
    if miner.price_per_1k_units > req.max_price {
        return false;
    }
    if miner.queue_len >= miner.max_parallel_slots {
        return false;
    }
    true
}

/// `cap_fit = |required ∩ declared| / |required|`; a job with no declared
/// tags trivially fits every miner.
fn cap_fit(miner: &Miner, req: &MatchRequirements) -> f64 {
    if req.constraints.tags.is_empty() {
        return 1.0;
    }
    let hit = req
        .constraints
        .tags
        .iter()
        .filter(|t| miner.capabilities.workload_tags.contains(t))
        .count();
    hit as f64 / req.constraints.tags.len() as f64
}

/// `(max_price − miner_price) / max_price`, clamped to `[0,1]`.
fn price_norm(miner: &Miner, req: &MatchRequirements) -> f64 {
    if req.max_price == 0 {
        return 0.0;
    }
    let max = req.max_price as f64;
    let price = miner.price_per_1k_units as f64;
    ((max - price) / max).clamp(0.0, 1.0)
}

/// `1 − percentile_rank(miner.avg_latency, region_population)`: lower
/// latency among the candidate pool scores closer to 1.
fn latency_norm(latency_ms: f64, population: &[f64]) -> f64 {
    if population.len() <= 1 {
        return 1.0;
    }
    let rank = population.iter().filter(|&&l| l < latency_ms).count();
    1.0 - (rank as f64 / (population.len() - 1) as f64)
}

/// `1 − queue_len / max_parallel`.
fn load_norm(miner: &Miner) -> f64 {
    if miner.max_parallel_slots == 0 {
        return 0.0;
    }
    1.0 - (miner.queue_len as f64 / miner.max_parallel_slots as f64)
}

/// Scores every miner that survives the hard filter and returns up to
/// `top_k` candidates, highest score first, ties broken by trust then by
/// `last_seen` recency (spec §4.4).
pub fn score_candidates(
    miners: &[Miner],
    snapshots: &[MatchmakingRecord],
    req: &MatchRequirements,
    hints: &MatchHints,
    weights: &ScoringWeights,
    ineligible_trust_floor: f64,
    top_k: usize,
    now: Timestamp,
) -> Vec<MatchCandidate> {
    let eligible: Vec<&Miner> = miners
        .iter()
        .filter(|m| passes_hard_filter(m, req, hints, ineligible_trust_floor, now))
        .collect();

    let latencies: Vec<f64> = eligible
        .iter()
        .filter_map(|m| snapshot_for(snapshots, m).map(|s| s.avg_latency_ms))
        .collect();

    let mut scored: Vec<(MatchCandidate, f64, i64)> = eligible
        .iter()
        .map(|m| {
            let snap = snapshot_for(snapshots, m);
            let latency_ms = snap.map(|s| s.avg_latency_ms).unwrap_or(0.0);
            let cf = cap_fit(m, req);
            let pn = price_norm(m, req);
            let ln = latency_norm(latency_ms, &latencies);
            let lo = load_norm(m);
            let trust = m.trust_score;

            let score = weights.cap_fit * cf
                + weights.price * pn
                + weights.latency * ln
                + weights.trust * trust
                + weights.load * lo;

            let explain = format!(
                "cap_fit={cf:.3}*{w_cf:.2} + price={pn:.3}*{w_p:.2} + latency={ln:.3}*{w_l:.2} + \
                 trust={trust:.3}*{w_t:.2} + load={lo:.3}*{w_ld:.2} = {score:.4}",
                w_cf = weights.cap_fit,
                w_p = weights.price,
                w_l = weights.latency,
                w_t = weights.trust,
                w_ld = weights.load,
            );

            (
                MatchCandidate {
                    miner_id: m.miner_id.clone(),
                    score,
                    explain,
                },
                m.trust_score,
                m.last_seen,
            )
        })
        .collect();

    scored.sort_by(|a, b| {
        b.0.score
            .partial_cmp(&a.0.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| b.2.cmp(&a.2))
    });

    scored.into_iter().take(top_k).map(|(c, _, _)| c).collect()
}

fn snapshot_for<'a>(snapshots: &'a [MatchmakingRecord], miner: &Miner) -> Option<&'a MatchmakingRecord> {
    snapshots.iter().find(|s| s.miner_id == miner.miner_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::miner::{MinerCapabilities, MinerStatus};
    use meridian_core::types::{Address, MinerId};

    fn miner(id: u8, vram: u32, price: u128, queue_len: u32, trust: f64) -> Miner {
        Miner {
            miner_id: MinerId::from_bytes([id; 32]),
            miner_version: 1,
            address: Address::from_bytes([id; 32]),
            endpoint_url: "https://miner.example".into(),
            api_key_hash: "x".into(),
            capabilities: MinerCapabilities {
                gpu_model: "A100".into(),
                vram_gb: vram,
                cpu_cores: 16,
                ram_gb: 64,
                workload_tags: vec!["llm".into()],
            },
            price_per_1k_units: price,
            max_parallel_slots: 4,
            region: Some("us-east".into()),
            trust_score: trust,
            status: MinerStatus::Online,
            queue_len,
            busy: false,
            last_seen: 1_000,
            registered_at: 0,
        }
    }

    fn req(min_vram: u32, max_price: u128) -> MatchRequirements {
        MatchRequirements {
            constraints: JobConstraints {
                min_vram_gb: min_vram,
                min_ram_gb: 8,
                tags: vec!["llm".into()],
                region: None,
            },
            max_price,
        }
    }

    #[test]
    fn hard_filter_rejects_insufficient_vram() {
        let m = miner(1, 8, 100, 0, 0.5);
        assert!(!passes_hard_filter(&m, &req(16, 100), &MatchHints::default(), 0.1, 1_000));
    }

    #[test]
    fn hard_filter_rejects_full_queue() {
        let mut m = miner(1, 24, 100, 4, 0.5);
        m.max_parallel_slots = 4;
        assert!(!passes_hard_filter(&m, &req(16, 100), &MatchHints::default(), 0.1, 1_000));
    }

    #[test]
    fn hard_filter_rejects_below_trust_floor() {
        let m = miner(1, 24, 100, 0, 0.05);
        assert!(!passes_hard_filter(&m, &req(16, 100), &MatchHints::default(), 0.1, 1_000));
    }

    #[test]
    fn hard_filter_accepts_heartbeat_exactly_at_the_grace_boundary() {
        let m = miner(1, 24, 100, 0, 0.5);
        let now = m.last_seen + HEARTBEAT_GRACE_SEC;
        assert!(passes_hard_filter(&m, &req(16, 100), &MatchHints::default(), 0.1, now));
    }

    #[test]
    fn hard_filter_rejects_heartbeat_one_past_the_grace_boundary() {
        let m = miner(1, 24, 100, 0, 0.5);
        let now = m.last_seen + HEARTBEAT_GRACE_SEC + 1;
        assert!(!passes_hard_filter(&m, &req(16, 100), &MatchHints::default(), 0.1, now));
    }

    #[test]
    fn scoring_prefers_cheaper_higher_trust_miner() {
        let cheap_trusted = miner(1, 24, 50, 0, 0.9);
        let expensive_new = miner(2, 24, 95, 0, 0.5);
        let miners = vec![cheap_trusted, expensive_new];
        let weights = ScoringWeights::default();
        let out = score_candidates(&miners, &[], &req(16, 100), &MatchHints::default(), &weights, 0.1, 3, 1_000);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].miner_id, MinerId::from_bytes([1; 32]));
        assert!(out[0].score > out[1].score);
    }

    #[test]
    fn top_k_truncates_result_set() {
        let miners: Vec<Miner> = (1..=5u8).map(|i| miner(i, 24, 50, 0, 0.5)).collect();
        let weights = ScoringWeights::default();
        let out = score_candidates(&miners, &[], &req(16, 100), &MatchHints::default(), &weights, 0.1, 2, 1_000);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn scoring_excludes_miners_with_a_stale_heartbeat() {
        let fresh = miner(1, 24, 50, 0, 0.5);
        let mut stale = miner(2, 24, 50, 0, 0.9);
        stale.last_seen = 0;
        let miners = vec![fresh, stale];
        let weights = ScoringWeights::default();
        let out = score_candidates(&miners, &[], &req(16, 100), &MatchHints::default(), &weights, 0.1, 3, 1_000);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].miner_id, MinerId::from_bytes([1; 32]));
    }
}
