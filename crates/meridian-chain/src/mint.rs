use meridian_core::types::Balance;

/// Split the tokens minted for a claimed `compute_units` between the miner
/// and the protocol treasury (spec §4.5 "Minting"). `coordinator_ratio` is a
/// chain parameter, distinct from the coordinator's escrow-side
/// `coordinator_cut` (spec §4.3) — the two cuts are configured
/// independently and this function only ever computes the former.
pub fn mint_for_receipt(
    compute_units: u64,
    mint_per_unit: Balance,
    coordinator_ratio: f64,
) -> (Balance, Balance) {
    let total = mint_per_unit.saturating_mul(compute_units as Balance);
    let coord_share = ((total as f64) * coordinator_ratio).round() as Balance;
    let miner_share = total.saturating_sub(coord_share);
    (miner_share, coord_share)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_by_coordinator_ratio() {
        let (miner, coord) = mint_for_receipt(1_000, 1, 0.05);
        assert_eq!(miner, 950);
        assert_eq!(coord, 50);
        assert_eq!(miner + coord, 1_000);
    }

    #[test]
    fn zero_ratio_gives_everything_to_miner() {
        let (miner, coord) = mint_for_receipt(500, 2, 0.0);
        assert_eq!(miner, 1_000);
        assert_eq!(coord, 0);
    }
}
