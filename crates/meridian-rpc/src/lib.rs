//! meridian-rpc
//!
//! The HTTP/WS surface shared by every Meridian node binary (spec §4.7):
//! `/rpc/*` chain reads and writes, `/jobs/*` client job lifecycle,
//! `/miner/*` registration/heartbeat/poll/result, `/match` matchmaking,
//! and `/stream/:topic` for block/tx push notifications. `AppState`
//! decides which routes actually do work for a given deployment role —
//! the router shape is the same everywhere.

pub mod auth;
pub mod chain_api;
pub mod error;
pub mod job_api;
pub mod metrics;
pub mod miner_api;
pub mod ratelimit;
pub mod server;
pub mod state;
pub mod ws;

pub use error::AppError;
pub use server::{build_router, serve};
pub use state::AppState;
