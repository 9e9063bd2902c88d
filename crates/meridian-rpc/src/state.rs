use std::sync::Arc;

use meridian_chain::{ChainParams, EconomicBounds, Mempool};
use meridian_coordinator::JobEngine;
use meridian_core::types::Balance;
use meridian_crypto::ZkVerifierRegistry;
use meridian_storage::Storage;
use meridian_sync::Broker;
use tokio::sync::Mutex;

use crate::auth::JwtKeys;
use crate::ratelimit::RateLimiters;

/// Everything a handler needs, shared behind `Arc` clones per spec §4.7's
/// axum surface. Not every deployment role populates every field — see
/// `meridian-chain-node`/`meridian-coordinator-node`/`meridian-pool-node`,
/// each of which wires only the routes its own fields support (§5
/// "independent processes").
#[derive(Clone)]
pub struct AppState {
    pub storage: Storage,
    pub chain_params: ChainParams,
    pub min_fee: Balance,
    pub economic_bounds: EconomicBounds,
    pub zk_registry: Arc<ZkVerifierRegistry>,
    /// `Some` only on the process holding proposer authority — the one
    /// that accepts `POST /rpc/sendTx`/`submitReceipt` and runs the PoA
    /// loop. A read-replica chain node leaves this `None` and serves only
    /// the `GET /rpc/*` read routes.
    pub mempool: Option<Arc<Mutex<Mempool>>>,
    /// `Some` only on the coordinator process — the `/jobs/*` and
    /// `/miner/poll|result` routes dispatch through this.
    pub job_engine: Option<Arc<JobEngine>>,
    pub broker: Broker,
    pub jwt_keys: Arc<JwtKeys>,
    pub limiters: Arc<RateLimiters>,
}
