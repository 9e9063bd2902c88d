use std::time::Instant;

use dashmap::DashMap;

/// A classic token bucket: `capacity` tokens refilled at `refill_per_sec`,
/// one consumed per admitted request. Lazily created per key on first use.
struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(rps: u32, burst: u32) -> Self {
        Self {
            tokens: burst as f64,
            capacity: burst as f64,
            refill_per_sec: rps as f64,
            last_refill: Instant::now(),
        }
    }

    fn try_take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-API-key token bucket rate limiter (spec §5 "Token bucket per API
/// key, default 10 rps / 100 burst"). A bare `IpAddr` key covers the
/// unauthenticated chain-read endpoints, which have no API key to bucket
/// on; every other endpoint buckets on the caller's resolved identity
/// (client address, miner id, or session token).
pub struct KeyedLimiter {
    buckets: DashMap<String, Bucket>,
    rps: u32,
    burst: u32,
}

impl KeyedLimiter {
    pub fn new(rps: u32, burst: u32) -> Self {
        Self { buckets: DashMap::new(), rps, burst }
    }

    /// `true` if `key` still has a token. Entries are never evicted — a
    /// devnet-scale key cardinality (clients, miners, IPs) stays bounded
    /// enough that this doesn't need a TTL sweep, unlike the gateway's
    /// longer-lived trusted-proxy `IpLimiter` it's grounded on.
    pub fn check(&self, key: &str) -> bool {
        let mut bucket = self.buckets.entry(key.to_string()).or_insert_with(|| Bucket::new(self.rps, self.burst));
        bucket.try_take()
    }
}

/// One limiter per rate-limited route family (spec §5: default, `sendTx`,
/// `match`), so a burst on one endpoint never starves another's bucket.
pub struct RateLimiters {
    pub default: KeyedLimiter,
    pub send_tx: KeyedLimiter,
    pub match_: KeyedLimiter,
}

impl RateLimiters {
    pub fn new() -> Self {
        Self {
            default: KeyedLimiter::new(
                meridian_core::DEFAULT_RATE_LIMIT_RPS,
                meridian_core::DEFAULT_RATE_LIMIT_BURST,
            ),
            send_tx: KeyedLimiter::new(
                meridian_core::SEND_TX_RATE_LIMIT_RPS,
                meridian_core::SEND_TX_RATE_LIMIT_BURST,
            ),
            match_: KeyedLimiter::new(
                meridian_core::MATCH_RATE_LIMIT_RPS,
                meridian_core::MATCH_RATE_LIMIT_BURST,
            ),
        }
    }
}

impl Default for RateLimiters {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_then_refills() {
        let limiter = KeyedLimiter::new(1, 2);
        assert!(limiter.check("k"));
        assert!(limiter.check("k"));
        assert!(!limiter.check("k"));
    }

    #[test]
    fn buckets_are_independent_per_key() {
        let limiter = KeyedLimiter::new(1, 1);
        assert!(limiter.check("a"));
        assert!(limiter.check("b"));
        assert!(!limiter.check("a"));
    }
}
