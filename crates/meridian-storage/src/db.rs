use std::str::FromStr;

use meridian_core::account::Account;
use meridian_core::escrow::EscrowState;
use meridian_core::job::{Job, JobConstraints, JobPayload, JobResult, JobState, PaymentState};
use meridian_core::matchmaking::MatchmakingRecord;
use meridian_core::miner::{Miner, MinerCapabilities, MinerStatus};
use meridian_core::receipt::ComputeReceipt;
use meridian_core::types::{
    Address, Balance, BlockHash, JobId, MinerId, Nonce, PaymentId, PublicKeyBytes, ReceiptId,
    Timestamp,
};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use crate::error::StorageError;

pub(crate) fn decode_err(e: impl std::error::Error + Send + Sync + 'static) -> StorageError {
    StorageError::Database(sqlx::Error::Decode(Box::new(e)))
}

/// Connection pool + schema migrations (C2, spec §4.2). Backed by SQLite —
/// a single-node deployment's `DB_PATH` resolves directly to a database
/// file. The row shapes here are a thin mapping layer only; `StorageSession`
/// (in `engine.rs`) owns every multi-row/transactional rule.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

const JOB_COLUMNS: &str = "job_id, job_version, client_addr, client_nonce, payload_json, \
    constraints_json, price_ceiling, deadline, state, assigned_miner, result_json, receipt_id, \
    payment_id, payment_state, retry_count, created_at, assigned_at, completed_at, progress_pct, \
    last_progress_at";

const MINER_COLUMNS: &str = "miner_id, miner_version, address, endpoint_url, api_key_hash, \
    capabilities_json, price_per_1k_units, max_parallel_slots, region, trust_score, status, \
    queue_len, busy, last_seen, registered_at, session_token, session_expires_at";

impl Storage {
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        // A bare `:memory:` database lives only on the connection that
        // created it — a pool of more than one would each see an empty,
        // independent database. Single-connection pools are only used by
        // in-process tests; real deployments always pass a file path.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 16 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ── Accounts ───────────────────────────────────────────────────────────

    pub async fn get_account(&self, address: &Address) -> Result<Option<Account>, StorageError> {
        let row = sqlx::query("SELECT address, balance, nonce, pubkey_hex FROM accounts WHERE address = ?1")
            .bind(address.to_hex())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| account_from_row(&r)).transpose()
    }

    // ── Jobs ───────────────────────────────────────────────────────────────

    pub async fn get_job(&self, job_id: &JobId) -> Result<Option<Job>, StorageError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE job_id = ?1");
        let row = sqlx::query(&sql)
            .bind(job_id.to_hex())
            .fetch_optional(&self.pool)
            .await?;
        row.map(job_from_row).transpose()
    }

    pub async fn job_by_client_nonce(
        &self,
        client_addr: &Address,
        client_nonce: u64,
    ) -> Result<Option<Job>, StorageError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE client_addr = ?1 AND client_nonce = ?2"
        );
        let row = sqlx::query(&sql)
            .bind(client_addr.to_hex())
            .bind(client_nonce as i64)
            .fetch_optional(&self.pool)
            .await?;
        row.map(job_from_row).transpose()
    }

    pub async fn list_jobs_by_state(&self, state: JobState) -> Result<Vec<Job>, StorageError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE state = ?1");
        let rows = sqlx::query(&sql)
            .bind(job_state_str(state))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(job_from_row).collect()
    }

    pub async fn list_jobs_for_miner_in_state(
        &self,
        miner_id: &MinerId,
        state: JobState,
    ) -> Result<Vec<Job>, StorageError> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE assigned_miner = ?1 AND state = ?2");
        let rows = sqlx::query(&sql)
            .bind(miner_id.to_hex())
            .bind(job_state_str(state))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(job_from_row).collect()
    }

    pub async fn list_jobs_past_deadline(&self, now: Timestamp) -> Result<Vec<Job>, StorageError> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE deadline < ?1 AND state IN ('assigned', 'running')"
        );
        let rows = sqlx::query(&sql).bind(now).fetch_all(&self.pool).await?;
        rows.into_iter().map(job_from_row).collect()
    }

    // ── Miners ─────────────────────────────────────────────────────────────

    pub async fn get_miner(&self, miner_id: &MinerId) -> Result<Option<Miner>, StorageError> {
        let sql = format!("SELECT {MINER_COLUMNS} FROM miners WHERE miner_id = ?1");
        let row = sqlx::query(&sql)
            .bind(miner_id.to_hex())
            .fetch_optional(&self.pool)
            .await?;
        row.map(miner_from_row).transpose()
    }

    pub async fn get_miner_by_session(&self, session_token: &str) -> Result<Option<Miner>, StorageError> {
        let sql = format!("SELECT {MINER_COLUMNS} FROM miners WHERE session_token = ?1");
        let row = sqlx::query(&sql)
            .bind(session_token)
            .fetch_optional(&self.pool)
            .await?;
        row.map(miner_from_row).transpose()
    }

    /// Snapshot of every currently-online miner, for the matchmaker's
    /// "reads a snapshot" rule (spec §5): a miner update in flight during
    /// scoring is visible to the *next* call, not this one — this is a
    /// point-in-time read with no lock held across the scoring pass.
    pub async fn list_online_miners(&self) -> Result<Vec<Miner>, StorageError> {
        let sql = format!("SELECT {MINER_COLUMNS} FROM miners WHERE status = 'online'");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(miner_from_row).collect()
    }

    /// Every registered miner regardless of status (spec §6 `miners
    /// list`), ordered newest-registered first.
    pub async fn list_miners(&self) -> Result<Vec<Miner>, StorageError> {
        let sql = format!("SELECT {MINER_COLUMNS} FROM miners ORDER BY registered_at DESC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(miner_from_row).collect()
    }

    pub async fn list_miners_with_stale_heartbeat(
        &self,
        cutoff: Timestamp,
    ) -> Result<Vec<Miner>, StorageError> {
        // Strict `<`, not `<=`: a miner whose last heartbeat landed exactly
        // `HEARTBEAT_GRACE_SEC` ago must remain online (spec §8 boundary).
        let sql = format!("SELECT {MINER_COLUMNS} FROM miners WHERE status = 'online' AND last_seen < ?1");
        let rows = sqlx::query(&sql).bind(cutoff).fetch_all(&self.pool).await?;
        rows.into_iter().map(miner_from_row).collect()
    }

    // ── Receipts ───────────────────────────────────────────────────────────

    pub async fn get_receipt(&self, receipt_id: &ReceiptId) -> Result<Option<ComputeReceipt>, StorageError> {
        let row = sqlx::query("SELECT receipt_json FROM receipts WHERE receipt_id = ?1")
            .bind(receipt_id.to_hex())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            let json: String = r.try_get("receipt_json")?;
            serde_json::from_str(&json).map_err(StorageError::from)
        })
        .transpose()
    }

    pub async fn get_receipt_by_job(&self, job_id: &JobId) -> Result<Option<ComputeReceipt>, StorageError> {
        let row = sqlx::query("SELECT receipt_json FROM receipts WHERE job_id = ?1")
            .bind(job_id.to_hex())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            let json: String = r.try_get("receipt_json")?;
            serde_json::from_str(&json).map_err(StorageError::from)
        })
        .transpose()
    }

    // ── Chain ──────────────────────────────────────────────────────────────

    pub async fn get_head_height(&self) -> Result<Option<u64>, StorageError> {
        let row = sqlx::query("SELECT MAX(height) AS h FROM blocks")
            .fetch_one(&self.pool)
            .await?;
        let h: Option<i64> = row.try_get("h")?;
        Ok(h.map(|v| v as u64))
    }

    pub async fn get_block_by_height(
        &self,
        height: u64,
    ) -> Result<Option<meridian_core::block::Block>, StorageError> {
        let row = sqlx::query("SELECT block_json FROM blocks WHERE height = ?1")
            .bind(height as i64)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            let json: String = r.try_get("block_json")?;
            serde_json::from_str(&json).map_err(StorageError::from)
        })
        .transpose()
    }

    pub async fn get_block_by_hash(
        &self,
        hash: &BlockHash,
    ) -> Result<Option<meridian_core::block::Block>, StorageError> {
        let row = sqlx::query("SELECT block_json FROM blocks WHERE block_hash = ?1")
            .bind(hash.to_hex())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            let json: String = r.try_get("block_json")?;
            serde_json::from_str(&json).map_err(StorageError::from)
        })
        .transpose()
    }

    pub async fn get_transaction(
        &self,
        tx_hash: &meridian_core::types::TxHash,
    ) -> Result<Option<meridian_core::transaction::Transaction>, StorageError> {
        let row = sqlx::query("SELECT tx_json FROM transactions WHERE tx_hash = ?1")
            .bind(tx_hash.to_hex())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            let json: String = r.try_get("tx_json")?;
            serde_json::from_str(&json).map_err(StorageError::from)
        })
        .transpose()
    }

    /// All transactions still awaiting inclusion, oldest first. The
    /// proposer loop calls this once at startup to rebuild its in-memory
    /// `Mempool` from whatever `enqueue_receipt_claim` (or any other
    /// submitter) persisted before the process last stopped — the mempool
    /// itself is never durable, only the `pending` row is.
    pub async fn list_pending_transactions(&self) -> Result<Vec<meridian_core::transaction::Transaction>, StorageError> {
        let rows = sqlx::query(
            "SELECT tx_json FROM transactions WHERE status = 'pending' ORDER BY rowid ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|r| {
                let json: String = r.try_get("tx_json")?;
                serde_json::from_str(&json).map_err(StorageError::from)
            })
            .collect()
    }

    pub async fn matchmaking_snapshot(&self) -> Result<Vec<MatchmakingRecord>, StorageError> {
        let rows = sqlx::query(
            "SELECT miner_id, queue_len, busy, avg_latency_ms, mem_free_gb, updated_at FROM matchmaking_status",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(matchmaking_from_row).collect()
    }

    // ── Audit log / tenants ──────────────────────────────────────────────────

    /// Most recent audit entries, newest first (spec §6 `audit-log`).
    pub async fn list_audit_entries(&self, limit: u32) -> Result<Vec<AuditEntry>, StorageError> {
        let rows = sqlx::query("SELECT job_id, event, detail, at FROM audit_log ORDER BY id DESC LIMIT ?1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|r| {
                Ok(AuditEntry {
                    job_id: r.try_get("job_id")?,
                    event: r.try_get("event")?,
                    detail: r.try_get("detail")?,
                    at: r.try_get("at")?,
                })
            })
            .collect()
    }

    /// `tenants add` (spec §6 CLI surface). Replaces the label if the
    /// address is already a known tenant.
    pub async fn upsert_tenant(&self, address: &Address, label: &str, now: Timestamp) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO tenants (address, label, created_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT (address) DO UPDATE SET label = excluded.label",
        )
        .bind(address.to_hex())
        .bind(label)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// `tenants remove`. `false` if the address was not a known tenant.
    pub async fn remove_tenant(&self, address: &Address) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM tenants WHERE address = ?1")
            .bind(address.to_hex())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// `tenants list`.
    pub async fn list_tenants(&self) -> Result<Vec<Tenant>, StorageError> {
        let rows = sqlx::query("SELECT address, label, created_at FROM tenants ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|r| {
                Ok(Tenant {
                    address: Address::from_hex(&r.try_get::<String, _>("address")?).map_err(decode_err)?,
                    label: r.try_get("label")?,
                    created_at: r.try_get("created_at")?,
                })
            })
            .collect()
    }
}

/// One row of the coordinator's job audit trail.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuditEntry {
    pub job_id: String,
    pub event: String,
    pub detail: String,
    pub at: Timestamp,
}

/// A client address the coordinator operator has explicitly onboarded
/// (spec §6 CLI surface `tenants list|add|remove`). Informational only —
/// `submit_job` does not currently gate on tenant membership, matching the
/// source's lack of a documented enforcement point for this list.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Tenant {
    pub address: Address,
    pub label: String,
    pub created_at: Timestamp,
}

// ── Row <-> domain mapping ───────────────────────────────────────────────────

pub(crate) fn account_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Account, StorageError> {
    let address_hex: String = row.try_get("address")?;
    let balance: String = row.try_get("balance")?;
    let nonce: i64 = row.try_get("nonce")?;
    let pubkey_hex: String = row.try_get("pubkey_hex")?;
    Ok(Account {
        address: Address::from_hex(&address_hex).map_err(decode_err)?,
        balance: Balance::from_str(&balance).unwrap_or(0),
        nonce: nonce as Nonce,
        pubkey: PublicKeyBytes(hex::decode(pubkey_hex).map_err(decode_err)?),
    })
}

pub(crate) fn job_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Job, StorageError> {
    let job_id: String = row.try_get("job_id")?;
    let payload_json: String = row.try_get("payload_json")?;
    let constraints_json: String = row.try_get("constraints_json")?;
    let price_ceiling: String = row.try_get("price_ceiling")?;
    let state: String = row.try_get("state")?;
    let assigned_miner: Option<String> = row.try_get("assigned_miner")?;
    let result_json: Option<String> = row.try_get("result_json")?;
    let receipt_id: Option<String> = row.try_get("receipt_id")?;
    let payment_id: Option<String> = row.try_get("payment_id")?;
    let payment_state: String = row.try_get("payment_state")?;

    Ok(Job {
        job_id: JobId::from_hex(&job_id).map_err(decode_err)?,
        job_version: row.try_get::<i64, _>("job_version")? as u32,
        client_addr: Address::from_hex(&row.try_get::<String, _>("client_addr")?).map_err(decode_err)?,
        client_nonce: row.try_get::<i64, _>("client_nonce")? as u64,
        payload: serde_json::from_str::<JobPayload>(&payload_json)?,
        constraints: serde_json::from_str::<JobConstraints>(&constraints_json)?,
        price_ceiling: Balance::from_str(&price_ceiling).unwrap_or(0),
        deadline: row.try_get("deadline")?,
        state: job_state_from_str(&state),
        assigned_miner: assigned_miner
            .map(|s| MinerId::from_hex(&s))
            .transpose()
            .map_err(decode_err)?,
        result: result_json.map(|j| serde_json::from_str::<JobResult>(&j)).transpose()?,
        receipt_id: receipt_id
            .map(|s| ReceiptId::from_hex(&s))
            .transpose()
            .map_err(decode_err)?,
        payment_id: payment_id
            .map(|s| PaymentId::from_hex(&s))
            .transpose()
            .map_err(decode_err)?,
        payment_state: payment_state_from_str(&payment_state),
        retry_count: row.try_get::<i64, _>("retry_count")? as u32,
        created_at: row.try_get("created_at")?,
        assigned_at: row.try_get("assigned_at")?,
        completed_at: row.try_get("completed_at")?,
        progress_pct: row.try_get::<Option<i64>, _>("progress_pct")?.map(|v| v as u8),
        last_progress_at: row.try_get("last_progress_at")?,
    })
}

pub(crate) fn miner_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Miner, StorageError> {
    let capabilities_json: String = row.try_get("capabilities_json")?;
    let price: String = row.try_get("price_per_1k_units")?;
    let status: String = row.try_get("status")?;
    Ok(Miner {
        miner_id: MinerId::from_hex(&row.try_get::<String, _>("miner_id")?).map_err(decode_err)?,
        miner_version: row.try_get::<i64, _>("miner_version")? as u32,
        address: Address::from_hex(&row.try_get::<String, _>("address")?).map_err(decode_err)?,
        endpoint_url: row.try_get("endpoint_url")?,
        api_key_hash: row.try_get("api_key_hash")?,
        capabilities: serde_json::from_str::<MinerCapabilities>(&capabilities_json)?,
        price_per_1k_units: Balance::from_str(&price).unwrap_or(0),
        max_parallel_slots: row.try_get::<i64, _>("max_parallel_slots")? as u32,
        region: row.try_get("region")?,
        trust_score: row.try_get("trust_score")?,
        status: miner_status_from_str(&status),
        queue_len: row.try_get::<i64, _>("queue_len")? as u32,
        busy: row.try_get::<i64, _>("busy")? != 0,
        last_seen: row.try_get("last_seen")?,
        registered_at: row.try_get("registered_at")?,
    })
}

pub(crate) fn matchmaking_from_row(row: sqlx::sqlite::SqliteRow) -> Result<MatchmakingRecord, StorageError> {
    Ok(MatchmakingRecord {
        miner_id: MinerId::from_hex(&row.try_get::<String, _>("miner_id")?).map_err(decode_err)?,
        queue_len: row.try_get::<i64, _>("queue_len")? as u32,
        busy: row.try_get::<i64, _>("busy")? != 0,
        avg_latency_ms: row.try_get("avg_latency_ms")?,
        mem_free_gb: row.try_get::<i64, _>("mem_free_gb")? as u32,
        updated_at: row.try_get("updated_at")?,
    })
}

pub(crate) fn job_state_str(s: JobState) -> &'static str {
    match s {
        JobState::Queued => "queued",
        JobState::Assigned => "assigned",
        JobState::Running => "running",
        JobState::Completed => "completed",
        JobState::Failed => "failed",
        JobState::Expired => "expired",
        JobState::Cancelled => "cancelled",
    }
}

pub(crate) fn job_state_from_str(s: &str) -> JobState {
    match s {
        "queued" => JobState::Queued,
        "assigned" => JobState::Assigned,
        "running" => JobState::Running,
        "completed" => JobState::Completed,
        "failed" => JobState::Failed,
        "expired" => JobState::Expired,
        "cancelled" => JobState::Cancelled,
        other => panic!("unknown job state in storage: {other}"),
    }
}

pub(crate) fn payment_state_str(s: PaymentState) -> &'static str {
    match s {
        PaymentState::Held => "held",
        PaymentState::Released => "released",
        PaymentState::Refunded => "refunded",
    }
}

pub(crate) fn payment_state_from_str(s: &str) -> PaymentState {
    match s {
        "held" => PaymentState::Held,
        "released" => PaymentState::Released,
        "refunded" => PaymentState::Refunded,
        other => panic!("unknown payment state in storage: {other}"),
    }
}

pub(crate) fn escrow_state_str(s: EscrowState) -> &'static str {
    match s {
        EscrowState::Held => "held",
        EscrowState::Released => "released",
        EscrowState::Refunded => "refunded",
    }
}

pub(crate) fn miner_status_str(s: MinerStatus) -> &'static str {
    match s {
        MinerStatus::Online => "online",
        MinerStatus::Offline => "offline",
    }
}

pub(crate) fn miner_status_from_str(s: &str) -> MinerStatus {
    match s {
        "online" => MinerStatus::Online,
        _ => MinerStatus::Offline,
    }
}
