//! meridian-coordinator
//!
//! The Job Lifecycle Engine (spec §4.3): accepts client job submissions,
//! dispatches them to the Pool Hub for matchmaking, tracks them through
//! `QUEUED → ASSIGNED → RUNNING → COMPLETED` (or one of the terminal
//! side-branches), and is the only crate that ever writes a
//! `RECEIPT_CLAIM` into the chain's mempool. It never talks to storage
//! directly except through `meridian-storage::StorageSession` — every
//! discipline rule from §4.2 is enforced there, not re-derived here.

pub mod config;
pub mod engine;
pub mod error;
pub mod retry;
pub mod waiters;

pub use config::CoordinatorConfig;
pub use engine::{FailureReason, JobEngine};
pub use error::CoordinatorError;
