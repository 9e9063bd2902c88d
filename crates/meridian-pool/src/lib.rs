//! meridian-pool
//!
//! The Pool Hub (spec §4.4): miner registration, heartbeat-based liveness,
//! matchmaking, and the trust-score feedback loop. Owns no chain or job
//! state — it is consulted by `meridian-coordinator`, never the other way
//! around, to keep the two crates acyclic.

pub mod credentials;
pub mod error;
pub mod feedback;
pub mod matcher;
pub mod registry;
pub mod scoring;

pub use error::PoolError;
pub use feedback::MatchOutcome;
pub use matcher::find_matches;
pub use registry::{
    heartbeat, register, submit_feedback, sweep_stale_heartbeats, HeartbeatStatus, Lease, RegistrationRequest,
};
pub use scoring::{passes_hard_filter, score_candidates, MatchHints, MatchRequirements};
