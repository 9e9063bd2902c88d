//! ─── Meridian protocol constants ────────────────────────────────────────────
//!
//! Defaults for every configuration option that is not operator-supplied
//! (see the chain/coordinator/pool-hub CLI `--help` for the full set).

// ── Escrow / payment ──────────────────────────────────────────────────────────

/// Coordinator's cut of a completed job's price, taken from escrow on
/// settlement. Chain parameter; may be overridden per deployment.
pub const DEFAULT_COORDINATOR_CUT: f64 = 0.05;

/// Tokens minted per compute unit claimed in a `RECEIPT_CLAIM`. Chain
/// parameter; may be overridden per deployment.
pub const DEFAULT_MINT_PER_UNIT: u128 = 1;

/// Protocol's share of newly minted tokens on receipt inclusion.
pub const DEFAULT_COORDINATOR_RATIO: f64 = 0.05;

// ── Job lifecycle ─────────────────────────────────────────────────────────────

/// Maximum automatic retries before a job is permanently `FAILED`.
pub const MAX_RETRIES: u32 = 3;

/// Base delay for exponential retry backoff (milliseconds).
pub const RETRY_BACKOFF_BASE_MS: u64 = 500;

/// Cap on retry backoff (milliseconds), regardless of attempt count.
pub const RETRY_BACKOFF_MAX_MS: u64 = 60_000;

/// Trust penalty for an invalid result (hash mismatch / schema violation).
pub const TRUST_PENALTY_INVALID_RESULT: f64 = 0.10;

/// Trust penalty when a miner explicitly reports failure.
pub const TRUST_PENALTY_MINER_REPORTED_FAILURE: f64 = 0.02;

/// Trust penalty when a job expires past its deadline.
pub const TRUST_PENALTY_EXPIRED: f64 = 0.05;

// ── Pool Hub ───────────────────────────────────────────────────────────────────

/// Seconds without a heartbeat before a miner is marked offline. Boundary
/// is strict `>` — a heartbeat landing exactly on the grace boundary keeps
/// the miner online.
pub const HEARTBEAT_GRACE_SEC: i64 = 120;

/// Default miner session token lifetime (seconds).
pub const SESSION_TTL_SEC: i64 = 60;

/// Default matchmaking candidate count.
pub const DEFAULT_TOP_K: usize = 3;

/// Initial trust score assigned to a newly registered miner.
pub const INITIAL_TRUST_SCORE: f64 = 0.5;

/// Trust floor below which a miner is ineligible for matching.
pub const TRUST_INELIGIBLE_THRESHOLD: f64 = 0.1;

/// Trust delta on a completed job.
pub const TRUST_DELTA_COMPLETED: f64 = 0.01;

/// Trust delta when a miner rejects a proposed match.
pub const TRUST_DELTA_REJECTED: f64 = -0.005;

/// Trust delta on a failed job.
pub const TRUST_DELTA_FAILED: f64 = -0.05;

/// Trust delta on a timed-out job.
pub const TRUST_DELTA_TIMEOUT: f64 = -0.10;

/// Default scoring weights `(cap_fit, price, latency, trust, load)`.
pub const DEFAULT_SCORING_WEIGHTS: (f64, f64, f64, f64, f64) = (0.40, 0.20, 0.20, 0.15, 0.05);

// ── Chain / PoA ────────────────────────────────────────────────────────────────

/// Target seconds between proposer ticks.
pub const DEFAULT_BLOCK_INTERVAL_SEC: u64 = 2;

/// Maximum transactions drained into a single block.
pub const DEFAULT_MAX_TXS_PER_BLOCK: usize = 500;

/// Maximum serialized size of a block body (bytes).
pub const DEFAULT_MAX_BLOCK_SIZE_BYTES: usize = 1_048_576;

/// Minimum fee accepted into the mempool.
pub const DEFAULT_MIN_FEE: u128 = 1;

// ── Cross-site sync ────────────────────────────────────────────────────────────

/// Default cadence for polling remote sites for new blocks.
pub const DEFAULT_CROSS_SITE_POLL_INTERVAL_SEC: u64 = 10;

/// Consecutive remote failures before the circuit breaker opens.
pub const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: u32 = 5;

/// Cooldown before a circuit breaker attempts to close again (seconds).
pub const DEFAULT_CIRCUIT_BREAKER_COOLDOWN_SEC: u64 = 30;

/// Safety cap on reorg depth; deeper forks are rejected rather than applied.
pub const DEFAULT_REORG_DEPTH_LIMIT: u64 = 64;

// ── Rate limiting ──────────────────────────────────────────────────────────────

/// Default token bucket: requests per second.
pub const DEFAULT_RATE_LIMIT_RPS: u32 = 10;
/// Default token bucket: burst capacity.
pub const DEFAULT_RATE_LIMIT_BURST: u32 = 100;

/// `sendTx` token bucket: requests per second.
pub const SEND_TX_RATE_LIMIT_RPS: u32 = 50;
/// `sendTx` token bucket: burst capacity.
pub const SEND_TX_RATE_LIMIT_BURST: u32 = 500;

/// `match` token bucket: requests per second.
pub const MATCH_RATE_LIMIT_RPS: u32 = 50;
/// `match` token bucket: burst capacity.
pub const MATCH_RATE_LIMIT_BURST: u32 = 100;

// ── Receipt limits ─────────────────────────────────────────────────────────────

/// Current receipt wire-format version. Bumped on breaking schema change.
pub const RECEIPT_FORMAT_VERSION: u32 = 1;
