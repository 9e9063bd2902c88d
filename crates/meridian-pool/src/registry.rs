use meridian_core::constants::{HEARTBEAT_GRACE_SEC, SESSION_TTL_SEC};
use meridian_core::miner::{Miner, MinerCapabilities, MinerStatus};
use meridian_core::types::{Address, Balance, MinerId, Timestamp};
use meridian_storage::Storage;
use serde::{Deserialize, Serialize};

use crate::credentials::{generate_session_token, hash_api_key, verify_api_key};
use crate::error::PoolError;
use crate::feedback::MatchOutcome;

/// A miner's self-declared capabilities and terms at `register` time,
/// which replace any previously stored values (excluding `api_key_hash`,
/// which only changes when the supplied key itself changes).
#[derive(Clone, Debug)]
pub struct RegistrationRequest {
    pub miner_id: MinerId,
    pub address: Address,
    pub endpoint_url: String,
    pub capabilities: MinerCapabilities,
    pub price_per_1k_units: Balance,
    pub max_parallel_slots: u32,
    pub region: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Lease {
    pub session_token: String,
    pub lease_ttl_sec: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeartbeatStatus {
    pub queue_len: u32,
    pub busy: bool,
    pub mem_free_gb: u32,
    pub avg_latency_ms: f64,
}

/// `register(miner_id, api_key, capabilities) → {session_token, lease_ttl}`
/// (spec §4.4). A miner seen for the first time is onboarded with
/// `INITIAL_TRUST_SCORE`; a returning miner must present the same key it
/// registered with or the call fails with `AuthFailed` and nothing is
/// written.
pub async fn register(
    storage: &Storage,
    req: RegistrationRequest,
    api_key: &str,
    now: Timestamp,
) -> Result<Lease, PoolError> {
    let mut session = storage.begin().await?;

    let (trust_score, api_key_hash) = match session.get_miner(&req.miner_id).await? {
        Some(existing) => {
            verify_api_key(api_key, &existing.api_key_hash)?;
            (existing.trust_score, existing.api_key_hash)
        }
        None => (
            meridian_core::constants::INITIAL_TRUST_SCORE,
            hash_api_key(api_key)?,
        ),
    };

    let miner = Miner {
        miner_id: req.miner_id.clone(),
        miner_version: 1,
        address: req.address,
        endpoint_url: req.endpoint_url,
        api_key_hash,
        capabilities: req.capabilities,
        price_per_1k_units: req.price_per_1k_units,
        max_parallel_slots: req.max_parallel_slots,
        region: req.region,
        trust_score,
        status: MinerStatus::Online,
        queue_len: 0,
        busy: false,
        last_seen: now,
        registered_at: now,
    };
    session.upsert_miner(&miner).await?;

    let session_token = generate_session_token();
    let expires_at = now + SESSION_TTL_SEC;
    session
        .set_miner_session(&req.miner_id, &session_token, expires_at)
        .await?;

    session.commit().await?;

    Ok(Lease {
        session_token,
        lease_ttl_sec: SESSION_TTL_SEC,
    })
}

/// `heartbeat(session_token, status)` (spec §4.4). Renews the lease and
/// refreshes the matchmaking snapshot used by `score_candidates`.
pub async fn heartbeat(
    storage: &Storage,
    session_token: &str,
    status: HeartbeatStatus,
    now: Timestamp,
) -> Result<(), PoolError> {
    let mut session = storage.begin().await?;

    let miner = session
        .get_miner_by_session(session_token)
        .await?
        .ok_or(PoolError::InvalidSession)?;

    session
        .record_heartbeat(
            &miner.miner_id,
            status.queue_len,
            status.busy,
            status.mem_free_gb,
            status.avg_latency_ms,
            now,
        )
        .await?;

    let new_expiry = now + SESSION_TTL_SEC;
    session
        .set_miner_session(&miner.miner_id, session_token, new_expiry)
        .await?;

    session.commit().await?;
    Ok(())
}

/// Sweeps miners whose `last_seen` is past `HEARTBEAT_GRACE_SEC` and marks
/// them offline (spec §4.4 "absence of heartbeat ... marks the miner
/// offline"). Intended to run on a periodic tick alongside `expire_watchdog`.
pub async fn sweep_stale_heartbeats(storage: &Storage, now: Timestamp) -> Result<usize, PoolError> {
    let cutoff = now - HEARTBEAT_GRACE_SEC;
    let stale = storage.list_miners_with_stale_heartbeat(cutoff).await?;

    let mut session = storage.begin().await?;
    for miner in &stale {
        session.mark_miner_offline(&miner.miner_id).await?;
    }
    session.commit().await?;
    Ok(stale.len())
}

/// `feedback(job_id, miner_id, outcome, ...)` (spec §4.4 trust update
/// table). `job_id`/`latency_ms`/`fail_code` are accepted for audit
/// logging by callers but the trust delta depends only on `outcome`.
pub async fn submit_feedback(
    storage: &Storage,
    miner_id: &MinerId,
    outcome: MatchOutcome,
) -> Result<(), PoolError> {
    let mut session = storage.begin().await?;
    session
        .get_miner(miner_id)
        .await?
        .ok_or_else(|| PoolError::NotFound(miner_id.to_hex()))?;
    session.apply_trust_delta(miner_id, outcome.trust_delta()).await?;
    session.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_storage::Storage;

    async fn temp_storage() -> Storage {
        let storage = Storage::connect("sqlite::memory:").await.unwrap();
        storage.migrate().await.unwrap();
        storage
    }

    fn sample_request(id: u8) -> RegistrationRequest {
        RegistrationRequest {
            miner_id: MinerId::from_bytes([id; 32]),
            address: Address::from_bytes([id; 32]),
            endpoint_url: "https://miner.example".into(),
            capabilities: MinerCapabilities {
                gpu_model: "A100".into(),
                vram_gb: 80,
                cpu_cores: 32,
                ram_gb: 256,
                workload_tags: vec!["llm".into()],
            },
            price_per_1k_units: 10,
            max_parallel_slots: 4,
            region: Some("us-east".into()),
        }
    }

    #[tokio::test]
    async fn register_then_reregister_with_wrong_key_fails() {
        let storage = temp_storage().await;
        let lease = register(&storage, sample_request(1), "secret-key", 1_000)
            .await
            .unwrap();
        assert_eq!(lease.lease_ttl_sec, SESSION_TTL_SEC);

        let err = register(&storage, sample_request(1), "wrong-key", 1_010)
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::AuthFailed));
    }

    #[tokio::test]
    async fn heartbeat_renews_lease_and_keeps_miner_online() {
        let storage = temp_storage().await;
        let lease = register(&storage, sample_request(2), "secret-key", 1_000)
            .await
            .unwrap();

        heartbeat(
            &storage,
            &lease.session_token,
            HeartbeatStatus {
                queue_len: 1,
                busy: true,
                mem_free_gb: 20,
                avg_latency_ms: 120.0,
            },
            1_050,
        )
        .await
        .unwrap();

        let miner = storage
            .get_miner(&MinerId::from_bytes([2; 32]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(miner.status, MinerStatus::Online);
        assert_eq!(miner.queue_len, 1);
    }

    #[tokio::test]
    async fn stale_miner_is_swept_offline() {
        let storage = temp_storage().await;
        register(&storage, sample_request(3), "secret-key", 1_000).await.unwrap();

        let swept = sweep_stale_heartbeats(&storage, 1_000 + HEARTBEAT_GRACE_SEC + 1)
            .await
            .unwrap();
        assert_eq!(swept, 1);

        let miner = storage
            .get_miner(&MinerId::from_bytes([3; 32]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(miner.status, MinerStatus::Offline);
    }

    #[tokio::test]
    async fn miner_exactly_at_heartbeat_grace_remains_online() {
        let storage = temp_storage().await;
        register(&storage, sample_request(7), "secret-key", 1_000).await.unwrap();

        // Elapsed time is exactly HEARTBEAT_GRACE_SEC — spec §8's boundary
        // is strict `>`, so this must not be swept.
        let swept = sweep_stale_heartbeats(&storage, 1_000 + HEARTBEAT_GRACE_SEC).await.unwrap();
        assert_eq!(swept, 0);

        let miner = storage
            .get_miner(&MinerId::from_bytes([7; 32]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(miner.status, MinerStatus::Online);
    }

    #[tokio::test]
    async fn feedback_applies_trust_delta() {
        let storage = temp_storage().await;
        register(&storage, sample_request(4), "secret-key", 1_000).await.unwrap();
        let miner_id = MinerId::from_bytes([4; 32]);

        submit_feedback(&storage, &miner_id, MatchOutcome::Completed).await.unwrap();
        let miner = storage.get_miner(&miner_id).await.unwrap().unwrap();
        assert!(miner.trust_score > meridian_core::constants::INITIAL_TRUST_SCORE);
    }
}
