use std::sync::Arc;
use std::time::Duration;

use meridian_chain::{common_ancestor, rewind_and_replay, validate_imported_blocks, ChainParams};
use meridian_core::types::Address;
use meridian_storage::Storage;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::remote::RemoteChain;

/// One polling worker per remote endpoint (spec §4.5 "Every node runs a
/// sync worker with a circuit breaker"). Runs until `shutdown` fires.
pub struct SyncWorker<R: RemoteChain> {
    storage: Storage,
    remote: R,
    chain_params: ChainParams,
    poll_interval: Duration,
    reorg_depth_limit: u64,
    breaker: Arc<Mutex<CircuitBreaker>>,
}

impl<R: RemoteChain> SyncWorker<R> {
    pub fn new(
        storage: Storage,
        remote: R,
        chain_params: ChainParams,
        poll_interval: Duration,
        reorg_depth_limit: u64,
        circuit_breaker_threshold: u32,
        circuit_breaker_cooldown: Duration,
    ) -> Self {
        Self {
            storage,
            remote,
            chain_params,
            poll_interval,
            reorg_depth_limit,
            breaker: Arc::new(Mutex::new(CircuitBreaker::new(
                circuit_breaker_threshold,
                circuit_breaker_cooldown,
            ))),
        }
    }

    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            {
                let mut breaker = self.breaker.lock().await;
                if breaker.should_attempt() {
                    drop(breaker);
                    if let Err(e) = self.poll_once().await {
                        warn!(error = %e, "sync poll failed");
                        self.breaker.lock().await.record_failure();
                    } else {
                        self.breaker.lock().await.record_success();
                    }
                } else {
                    drop(breaker);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn poll_once(&self) -> Result<(), String> {
        let remote_head = self.remote.get_head().await.map_err(|e| e.to_string())?;
        let local_head = self
            .storage
            .get_head_height()
            .await
            .map_err(|e| e.to_string())?
            .unwrap_or(0);

        if remote_head <= local_head {
            return Ok(());
        }

        // Never pull/validate height 0: genesis is written directly by
        // `apply_genesis` with `proposer = treasury_address` and an empty
        // `sig` (spec §4.5's proposer-signature check does not apply to
        // it — both sides are expected to have applied the same genesis
        // file out of band). Bound how far back we go by the reorg depth
        // limit; anything further back would be rejected by
        // `rewind_and_replay` anyway, so there is no point fetching it.
        let start = local_head.saturating_sub(self.reorg_depth_limit).max(1);

        let remote_blocks = self
            .remote
            .get_blocks(start, remote_head)
            .await
            .map_err(|e| e.to_string())?;

        validate_imported_blocks(&self.storage, &remote_blocks, &self.chain_params.trusted_proposers)
            .await
            .map_err(|e| e.to_string())?;

        let ancestor = common_ancestor(&self.storage, &remote_blocks)
            .await
            .map_err(|e| e.to_string())?
            .ok_or("no common ancestor with remote chain")?;

        let new_blocks: Vec<_> = remote_blocks
            .into_iter()
            .filter(|b| b.height > ancestor)
            .collect();

        if new_blocks.is_empty() {
            return Ok(());
        }

        info!(
            ancestor,
            local_head,
            remote_head,
            applying = new_blocks.len(),
            "reorg: rewinding to common ancestor and replaying remote chain"
        );

        rewind_and_replay(
            &self.storage,
            local_head,
            ancestor,
            &new_blocks,
            &self.chain_params,
            self.reorg_depth_limit,
        )
        .await
        .map_err(|e| e.to_string())
    }
}

/// Spawn one [`SyncWorker`] per configured remote endpoint (spec §6
/// `CROSS_SITE_REMOTE_ENDPOINTS`).
pub fn trusted_proposers_from(addresses: &[String]) -> Vec<Address> {
    addresses
        .iter()
        .filter_map(|s| Address::from_hex(s).ok())
        .collect()
}
