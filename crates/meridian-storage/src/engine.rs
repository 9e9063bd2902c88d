use std::str::FromStr;

use meridian_core::account::Account;
use meridian_core::escrow::EscrowState;
use meridian_core::job::{Job, JobState, PaymentState};
use meridian_core::miner::{Miner, MinerStatus};
use meridian_core::receipt::ComputeReceipt;
use meridian_core::types::{Address, Balance, JobId, MinerId, PaymentId, PublicKeyBytes, ReceiptId, Timestamp};
use sqlx::{Row, Sqlite, Transaction};

use crate::db::{
    account_from_row, decode_err, escrow_state_str, job_state_str, miner_status_str,
    payment_state_str, Storage,
};
use crate::error::StorageError;

impl Storage {
    /// Open a scoped transactional session. Every discipline rule in spec
    /// §4.2 is a method on `StorageSession`, never something a caller
    /// assembles itself out of raw queries.
    pub async fn begin(&self) -> Result<StorageSession<'_>, StorageError> {
        Ok(StorageSession {
            tx: self.pool().begin().await?,
        })
    }
}

/// A per-request scoped transactional session (spec §4.2). Dropping it
/// without calling `commit` rolls back — callers that bail out with `?`
/// partway through a multi-step operation never leave partial writes
/// behind.
pub struct StorageSession<'c> {
    tx: Transaction<'c, Sqlite>,
}

impl<'c> StorageSession<'c> {
    pub async fn commit(self) -> Result<(), StorageError> {
        self.tx.commit().await?;
        Ok(())
    }

    // ── Accounts ───────────────────────────────────────────────────────────

    pub async fn get_account(&mut self, address: &Address) -> Result<Option<Account>, StorageError> {
        let row = sqlx::query("SELECT address, balance, nonce, pubkey_hex FROM accounts WHERE address = ?1")
            .bind(address.to_hex())
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(|r| account_from_row(&r)).transpose()
    }

    pub async fn upsert_account(&mut self, account: &Account) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO accounts (address, balance, nonce, pubkey_hex) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT (address) DO UPDATE SET balance = excluded.balance, nonce = excluded.nonce, \
             pubkey_hex = excluded.pubkey_hex",
        )
        .bind(account.address.to_hex())
        .bind(account.balance.to_string())
        .bind(account.nonce as i64)
        .bind(hex::encode(&account.pubkey.0))
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    /// Credit `address`'s balance by `amount`, creating the account row
    /// (zero pubkey placeholder) if it does not yet exist. Used for escrow
    /// settlement/refund and block-apply minting — never for ordinary
    /// transfers, which always touch a pre-existing sender account.
    async fn credit(&mut self, address: &Address, amount: Balance) -> Result<(), StorageError> {
        let existing = self.get_account(address).await?;
        let mut account = existing.unwrap_or_else(|| Account {
            address: address.clone(),
            balance: 0,
            nonce: 0,
            pubkey: meridian_core::types::PublicKeyBytes(vec![]),
        });
        account.balance = account.balance.saturating_add(amount);
        self.upsert_account(&account).await
    }

    async fn debit(&mut self, address: &Address, amount: Balance) -> Result<(), StorageError> {
        let mut account = self
            .get_account(address)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("account {address}")))?;
        if account.balance < amount {
            return Err(StorageError::InvalidTransition(format!(
                "insufficient balance: need {amount}, have {}",
                account.balance
            )));
        }
        account.balance -= amount;
        self.upsert_account(&account).await
    }

    // ── Jobs / escrow (discipline rule 1) ───────────────────────────────────

    /// `submit_job` (spec §4.3): debit `price_ceiling + fee` from the
    /// client, hold it in escrow, insert the job as `QUEUED`. Idempotent on
    /// `(client_addr, client_nonce)` via the unique index — a second call
    /// with the same pair fails with `Duplicate` before any balance is
    /// touched a second time; the caller (coordinator) checks
    /// `job_by_client_nonce` first and short-circuits.
    pub async fn insert_job_with_escrow(&mut self, job: &Job, fee: Balance) -> Result<(), StorageError> {
        self.debit(&job.client_addr, job.price_ceiling + fee).await?;

        sqlx::query(
            "INSERT INTO jobs (job_id, job_version, client_addr, client_nonce, payload_json, \
             constraints_json, price_ceiling, deadline, state, assigned_miner, result_json, \
             receipt_id, payment_id, payment_state, retry_count, created_at, assigned_at, \
             completed_at, progress_pct, last_progress_at) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20)",
        )
        .bind(job.job_id.to_hex())
        .bind(job.job_version as i64)
        .bind(job.client_addr.to_hex())
        .bind(job.client_nonce as i64)
        .bind(serde_json::to_string(&job.payload)?)
        .bind(serde_json::to_string(&job.constraints)?)
        .bind(job.price_ceiling.to_string())
        .bind(job.deadline)
        .bind(job_state_str(job.state))
        .bind(job.assigned_miner.as_ref().map(|m| m.to_hex()))
        .bind(job.result.as_ref().map(serde_json::to_string).transpose()?)
        .bind(job.receipt_id.as_ref().map(|r| r.to_hex()))
        .bind(job.payment_id.as_ref().map(|p| p.to_hex()))
        .bind(payment_state_str(job.payment_state))
        .bind(job.retry_count as i64)
        .bind(job.created_at)
        .bind(job.assigned_at)
        .bind(job.completed_at)
        .bind(job.progress_pct.map(|p| p as i64))
        .bind(job.last_progress_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StorageError::Duplicate(format!(
                    "job for (client_addr, client_nonce) = ({}, {})",
                    job.client_addr, job.client_nonce
                ))
            }
            _ => StorageError::Database(e),
        })?;

        sqlx::query(
            "INSERT INTO escrow_entries (job_id, client_addr, amount, state) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(job.job_id.to_hex())
        .bind(job.client_addr.to_hex())
        .bind(job.price_ceiling.to_string())
        .bind(escrow_state_str(EscrowState::Held))
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    /// `assign(job_id)` (spec §4.3): `QUEUED → ASSIGNED`.
    pub async fn assign_job(
        &mut self,
        job_id: &JobId,
        miner_id: &MinerId,
        now: Timestamp,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE jobs SET state = ?1, assigned_miner = ?2, assigned_at = ?3 \
             WHERE job_id = ?4 AND state = ?5",
        )
        .bind(job_state_str(JobState::Assigned))
        .bind(miner_id.to_hex())
        .bind(now)
        .bind(job_id.to_hex())
        .bind(job_state_str(JobState::Queued))
        .execute(&mut *self.tx)
        .await?;
        require_one_row(result, "assign job: not in QUEUED state")
    }

    /// `poll(miner)` (spec §4.3): `ASSIGNED → RUNNING`, scoped to the
    /// assigned miner so a different miner can never pull someone else's
    /// job.
    pub async fn start_running(
        &mut self,
        job_id: &JobId,
        miner_id: &MinerId,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE jobs SET state = ?1 WHERE job_id = ?2 AND assigned_miner = ?3 AND state = ?4",
        )
        .bind(job_state_str(JobState::Running))
        .bind(job_id.to_hex())
        .bind(miner_id.to_hex())
        .bind(job_state_str(JobState::Assigned))
        .execute(&mut *self.tx)
        .await?;
        require_one_row(result, "poll: job not ASSIGNED to this miner")
    }

    pub async fn update_progress(
        &mut self,
        job_id: &JobId,
        miner_id: &MinerId,
        pct: u8,
        now: Timestamp,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE jobs SET progress_pct = ?1, last_progress_at = ?2 \
             WHERE job_id = ?3 AND assigned_miner = ?4 AND state = ?5",
        )
        .bind(pct as i64)
        .bind(now)
        .bind(job_id.to_hex())
        .bind(miner_id.to_hex())
        .bind(job_state_str(JobState::Running))
        .execute(&mut *self.tx)
        .await?;
        require_one_row(result, "report_progress: job not RUNNING for this miner")
    }

    /// `submit_result` (spec §4.3): `RUNNING → COMPLETED`, atomic with the
    /// escrow release and the receipt insert (discipline rules 1 and 2 in
    /// the same breath — this is the one boundary the spec calls out by
    /// name: "all job state changes that cross ASSIGNED ↔ COMPLETED happen
    /// inside a single transaction that also writes the Escrow delta").
    /// Duplicate `receipt_id` surfaces as `StorageError::ReplayedReceipt`.
    pub async fn complete_job_with_receipt(
        &mut self,
        job_id: &JobId,
        miner_id: &MinerId,
        receipt: &ComputeReceipt,
        payment_id: &PaymentId,
        miner_addr: &Address,
        miner_payout: Balance,
        treasury_addr: &Address,
        treasury_cut: Balance,
        now: Timestamp,
    ) -> Result<(), StorageError> {
        let receipt_json = serde_json::to_string(receipt)?;
        sqlx::query(
            "INSERT INTO receipts (receipt_id, job_id, client_addr, miner_addr, compute_units, \
             price, output_hash_hex, started_at, completed_at, receipt_json, included_at) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,NULL)",
        )
        .bind(receipt.receipt_id.to_hex())
        .bind(job_id.to_hex())
        .bind(receipt.client_addr.to_hex())
        .bind(receipt.miner_addr.to_hex())
        .bind(receipt.compute_units as i64)
        .bind(receipt.price as i64)
        .bind(hex::encode(receipt.output_hash))
        .bind(receipt.started_at)
        .bind(receipt.completed_at)
        .bind(&receipt_json)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StorageError::ReplayedReceipt(receipt.receipt_id.to_hex())
            }
            _ => StorageError::Database(e),
        })?;

        let result = sqlx::query(
            "UPDATE jobs SET state = ?1, receipt_id = ?2, payment_id = ?3, payment_state = ?4, \
             completed_at = ?5 WHERE job_id = ?6 AND assigned_miner = ?7 AND state = ?8",
        )
        .bind(job_state_str(JobState::Completed))
        .bind(receipt.receipt_id.to_hex())
        .bind(payment_id.to_hex())
        .bind(payment_state_str(PaymentState::Released))
        .bind(now)
        .bind(job_id.to_hex())
        .bind(miner_id.to_hex())
        .bind(job_state_str(JobState::Running))
        .execute(&mut *self.tx)
        .await?;
        require_one_row(result, "submit_result: job not RUNNING for this miner")?;

        sqlx::query("UPDATE escrow_entries SET state = ?1 WHERE job_id = ?2")
            .bind(escrow_state_str(EscrowState::Released))
            .bind(job_id.to_hex())
            .execute(&mut *self.tx)
            .await?;

        self.credit(miner_addr, miner_payout).await?;
        self.credit(treasury_addr, treasury_cut).await?;
        Ok(())
    }

    /// Refund the full escrowed price back to the client and move the job
    /// into a terminal failure state (`FAILED`, `EXPIRED`, or `CANCELLED`).
    /// Shared by `report_failure` (after retries exhausted), `cancel`, and
    /// `expire_watchdog`.
    pub async fn refund_and_terminate(
        &mut self,
        job: &Job,
        terminal_state: JobState,
        now: Timestamp,
    ) -> Result<(), StorageError> {
        debug_assert!(terminal_state.is_terminal());
        let result = sqlx::query(
            "UPDATE jobs SET state = ?1, payment_state = ?2, completed_at = ?3 \
             WHERE job_id = ?4 AND state = ?5",
        )
        .bind(job_state_str(terminal_state))
        .bind(payment_state_str(PaymentState::Refunded))
        .bind(now)
        .bind(job.job_id.to_hex())
        .bind(job_state_str(job.state))
        .execute(&mut *self.tx)
        .await?;
        require_one_row(result, "refund: job state changed underneath us")?;

        sqlx::query("UPDATE escrow_entries SET state = ?1 WHERE job_id = ?2")
            .bind(escrow_state_str(EscrowState::Refunded))
            .bind(job.job_id.to_hex())
            .execute(&mut *self.tx)
            .await?;

        self.credit(&job.client_addr, job.price_ceiling).await?;
        Ok(())
    }

    /// Retryable failure: job returns to `QUEUED` (no refund — escrow is
    /// still held for the next attempt), with `retry_count` incremented and
    /// `assigned_miner` cleared so it can land on a different miner.
    pub async fn requeue_for_retry(&mut self, job_id: &JobId) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE jobs SET state = ?1, assigned_miner = NULL, assigned_at = NULL, \
             retry_count = retry_count + 1 WHERE job_id = ?2",
        )
        .bind(job_state_str(JobState::Queued))
        .bind(job_id.to_hex())
        .execute(&mut *self.tx)
        .await?;
        require_one_row(result, "requeue: job not found")
    }

    // ── Miners ─────────────────────────────────────────────────────────────

    pub async fn upsert_miner(&mut self, miner: &Miner) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO miners (miner_id, miner_version, address, endpoint_url, api_key_hash, \
             capabilities_json, price_per_1k_units, max_parallel_slots, region, trust_score, \
             status, queue_len, busy, last_seen, registered_at, session_token, session_expires_at) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,NULL,NULL) \
             ON CONFLICT (miner_id) DO UPDATE SET \
               endpoint_url = excluded.endpoint_url, api_key_hash = excluded.api_key_hash, \
               capabilities_json = excluded.capabilities_json, \
               price_per_1k_units = excluded.price_per_1k_units, \
               max_parallel_slots = excluded.max_parallel_slots, region = excluded.region, \
               status = excluded.status, last_seen = excluded.last_seen",
        )
        .bind(miner.miner_id.to_hex())
        .bind(miner.miner_version as i64)
        .bind(miner.address.to_hex())
        .bind(&miner.endpoint_url)
        .bind(&miner.api_key_hash)
        .bind(serde_json::to_string(&miner.capabilities)?)
        .bind(miner.price_per_1k_units.to_string())
        .bind(miner.max_parallel_slots as i64)
        .bind(&miner.region)
        .bind(miner.trust_score)
        .bind(miner_status_str(miner.status))
        .bind(miner.queue_len as i64)
        .bind(miner.busy as i64)
        .bind(miner.last_seen)
        .bind(miner.registered_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn set_miner_session(
        &mut self,
        miner_id: &MinerId,
        session_token: &str,
        expires_at: Timestamp,
    ) -> Result<(), StorageError> {
        sqlx::query("UPDATE miners SET session_token = ?1, session_expires_at = ?2, status = ?3 WHERE miner_id = ?4")
            .bind(session_token)
            .bind(expires_at)
            .bind(miner_status_str(MinerStatus::Online))
            .bind(miner_id.to_hex())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    pub async fn record_heartbeat(
        &mut self,
        miner_id: &MinerId,
        queue_len: u32,
        busy: bool,
        mem_free_gb: u32,
        avg_latency_ms: f64,
        now: Timestamp,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE miners SET queue_len = ?1, busy = ?2, last_seen = ?3, status = ?4 WHERE miner_id = ?5",
        )
        .bind(queue_len as i64)
        .bind(busy as i64)
        .bind(now)
        .bind(miner_status_str(MinerStatus::Online))
        .bind(miner_id.to_hex())
        .execute(&mut *self.tx)
        .await?;

        sqlx::query(
            "INSERT INTO matchmaking_status (miner_id, queue_len, busy, avg_latency_ms, mem_free_gb, updated_at) \
             VALUES (?1,?2,?3,?4,?5,?6) \
             ON CONFLICT (miner_id) DO UPDATE SET queue_len = excluded.queue_len, busy = excluded.busy, \
               avg_latency_ms = excluded.avg_latency_ms, mem_free_gb = excluded.mem_free_gb, \
               updated_at = excluded.updated_at",
        )
        .bind(miner_id.to_hex())
        .bind(queue_len as i64)
        .bind(busy as i64)
        .bind(avg_latency_ms)
        .bind(mem_free_gb as i64)
        .bind(now)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    pub async fn mark_miner_offline(&mut self, miner_id: &MinerId) -> Result<(), StorageError> {
        sqlx::query("UPDATE miners SET status = ?1 WHERE miner_id = ?2")
            .bind(miner_status_str(MinerStatus::Offline))
            .bind(miner_id.to_hex())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    pub async fn apply_trust_delta(&mut self, miner_id: &MinerId, delta: f64) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE miners SET trust_score = MIN(1.0, MAX(0.0, trust_score + ?1)) WHERE miner_id = ?2",
        )
        .bind(delta)
        .bind(miner_id.to_hex())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    // ── Chain ──────────────────────────────────────────────────────────────

    /// Persist a validated block and apply its transactions' account
    /// deltas in one transaction (spec §4.5 step 5). `deltas` is the set of
    /// `(address, new_balance, new_nonce)` triples computed by the caller
    /// (`meridian-chain`) after re-validating every drained transaction.
    pub async fn insert_block(
        &mut self,
        block: &meridian_core::block::Block,
        account_deltas: &[Account],
    ) -> Result<(), StorageError> {
        let header_hash = meridian_core_block_hash(block);
        sqlx::query(
            "INSERT INTO blocks (height, block_hash, parent_hash, timestamp, proposer, state_root, block_json) \
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
        )
        .bind(block.height as i64)
        .bind(hex::encode(header_hash))
        .bind(block.parent.to_hex())
        .bind(block.timestamp)
        .bind(block.proposer.to_hex())
        .bind(hex::encode(block.state_root))
        .bind(serde_json::to_string(block)?)
        .execute(&mut *self.tx)
        .await?;

        for account in account_deltas {
            let prev = self.get_account(&account.address).await?;
            let (prev_balance, prev_nonce) = match prev {
                Some(a) => (a.balance, a.nonce),
                None => (0, 0),
            };
            sqlx::query(
                "INSERT INTO account_history (block_height, address, prev_balance, prev_nonce) \
                 VALUES (?1,?2,?3,?4)",
            )
            .bind(block.height as i64)
            .bind(account.address.to_hex())
            .bind(prev_balance.to_string())
            .bind(prev_nonce as i64)
            .execute(&mut *self.tx)
            .await?;
            self.upsert_account(account).await?;
        }

        for tx in &block.txs {
            sqlx::query(
                "INSERT INTO transactions (tx_hash, sender, nonce, fee, kind, tx_json, status, block_height) \
                 VALUES (?1,?2,?3,?4,?5,?6,'included',?7) \
                 ON CONFLICT (tx_hash) DO UPDATE SET status = 'included', block_height = excluded.block_height",
            )
            .bind(tx.tx_hash.to_hex())
            .bind(tx.sender.to_hex())
            .bind(tx.nonce as i64)
            .bind(tx.fee.to_string())
            .bind(tx_kind_str(&tx.kind))
            .bind(serde_json::to_string(tx)?)
            .bind(block.height as i64)
            .execute(&mut *self.tx)
            .await?;

            if let meridian_core::transaction::TxKind::ReceiptClaim { receipt } = &tx.kind {
                sqlx::query("UPDATE receipts SET included_at = ?1 WHERE receipt_id = ?2")
                    .bind(block.timestamp)
                    .bind(receipt.receipt_id.to_hex())
                    .execute(&mut *self.tx)
                    .await?;
            }
        }
        Ok(())
    }

    pub async fn insert_pending_transaction(
        &mut self,
        tx: &meridian_core::transaction::Transaction,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO transactions (tx_hash, sender, nonce, fee, kind, tx_json, status, block_height) \
             VALUES (?1,?2,?3,?4,?5,?6,'pending',NULL)",
        )
        .bind(tx.tx_hash.to_hex())
        .bind(tx.sender.to_hex())
        .bind(tx.nonce as i64)
        .bind(tx.fee.to_string())
        .bind(tx_kind_str(&tx.kind))
        .bind(serde_json::to_string(tx)?)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StorageError::Duplicate(format!("tx for (sender, nonce) = ({}, {})", tx.sender, tx.nonce))
            }
            _ => StorageError::Database(e),
        })?;
        Ok(())
    }

    pub async fn receipt_id_exists(&mut self, receipt_id: &ReceiptId) -> Result<bool, StorageError> {
        let row = sqlx::query("SELECT 1 AS one FROM receipts WHERE receipt_id = ?1")
            .bind(receipt_id.to_hex())
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.is_some())
    }

    /// Revert every block above `target_height`, restoring each touched
    /// account's pre-block balance/nonce from `account_history` in
    /// descending height order (spec §4.5 "state is rebuilt for the
    /// affected range"). Transactions in reverted blocks return to
    /// `pending`. Leaves `target_height` as the new local head.
    pub async fn rewind_to(&mut self, target_height: u64) -> Result<(), StorageError> {
        let height_rows = sqlx::query(
            "SELECT DISTINCT height FROM blocks WHERE height > ?1 ORDER BY height DESC",
        )
        .bind(target_height as i64)
        .fetch_all(&mut *self.tx)
        .await?;
        let heights: Vec<i64> = height_rows
            .into_iter()
            .map(|r| r.try_get::<i64, _>("height"))
            .collect::<Result<_, _>>()?;

        for height in heights {
            let rows = sqlx::query(
                "SELECT address, prev_balance, prev_nonce FROM account_history WHERE block_height = ?1",
            )
            .bind(height)
            .fetch_all(&mut *self.tx)
            .await?;

            for row in rows {
                let address_hex: String = row.try_get("address")?;
                let prev_balance: String = row.try_get("prev_balance")?;
                let prev_nonce: i64 = row.try_get("prev_nonce")?;
                let address = Address::from_hex(&address_hex).map_err(decode_err)?;
                let pubkey = self
                    .get_account(&address)
                    .await?
                    .map(|a| a.pubkey)
                    .unwrap_or_else(|| PublicKeyBytes(vec![]));
                self.upsert_account(&Account {
                    address,
                    balance: Balance::from_str(&prev_balance).unwrap_or(0),
                    nonce: prev_nonce as u64,
                    pubkey,
                })
                .await?;
            }

            sqlx::query("DELETE FROM account_history WHERE block_height = ?1")
                .bind(height)
                .execute(&mut *self.tx)
                .await?;
            sqlx::query(
                "UPDATE transactions SET status = 'pending', block_height = NULL WHERE block_height = ?1",
            )
            .bind(height)
            .execute(&mut *self.tx)
            .await?;
            sqlx::query("DELETE FROM blocks WHERE height = ?1")
                .bind(height)
                .execute(&mut *self.tx)
                .await?;
        }
        Ok(())
    }

    // ── Audit log ──────────────────────────────────────────────────────────

    /// Appends one lifecycle transition to the audit trail (spec §6
    /// `audit-log`). Called from the same session as the state change it
    /// records, so a rolled-back transition never leaves an orphaned entry.
    pub async fn record_audit(
        &mut self,
        job_id: &JobId,
        event: &str,
        detail: &str,
        at: Timestamp,
    ) -> Result<(), StorageError> {
        sqlx::query("INSERT INTO audit_log (job_id, event, detail, at) VALUES (?1, ?2, ?3, ?4)")
            .bind(job_id.to_hex())
            .bind(event)
            .bind(detail)
            .bind(at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}

fn require_one_row(result: sqlx::sqlite::SqliteQueryResult, context: &str) -> Result<(), StorageError> {
    if result.rows_affected() == 1 {
        Ok(())
    } else {
        Err(StorageError::InvalidTransition(context.to_string()))
    }
}

fn tx_kind_str(kind: &meridian_core::transaction::TxKind) -> &'static str {
    match kind {
        meridian_core::transaction::TxKind::Transfer { .. } => "transfer",
        meridian_core::transaction::TxKind::ReceiptClaim { .. } => "receipt_claim",
    }
}

/// Recompute the header hash the same way `meridian-chain` does, so the
/// persisted `blocks.block_hash` column always matches what verification
/// will later recompute independently.
fn meridian_core_block_hash(block: &meridian_core::block::Block) -> [u8; 32] {
    let mut buf = Vec::new();
    buf.extend_from_slice(block.parent.as_bytes());
    buf.extend_from_slice(&block.height.to_be_bytes());
    buf.extend_from_slice(&block.timestamp.to_be_bytes());
    buf.extend_from_slice(block.proposer.as_bytes());
    buf.extend_from_slice(&block.state_root);
    meridian_crypto::sha256(&buf)
}
