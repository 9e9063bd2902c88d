use rand::Rng;

/// `base × 2^attempt`, capped at `max_ms`, with up to 20% jitter added on
/// top of the cap (spec §4.3 "Exponential backoff base × 2^k, capped, with
/// jitter"). `attempt` is the retry count *before* this backoff is applied
/// (the first retry uses `attempt = 0`).
pub fn backoff_delay_ms(attempt: u32, base_ms: u64, max_ms: u64) -> u64 {
    let exp = base_ms.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
    let capped = exp.min(max_ms);
    let jitter_span = capped / 5;
    if jitter_span == 0 {
        return capped;
    }
    capped + rand::thread_rng().gen_range(0..=jitter_span)
}
