use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use meridian_chain::{validate_common, validate_receipt_claim, TrustingAttestor};
use meridian_core::account::Account;
use meridian_core::transaction::{Transaction, TxKind};
use meridian_core::types::{Address, BlockHash, TxHash};
use meridian_crypto::KeyResolver;
use meridian_storage::Storage;
use meridian_sync::{SyncEvent, Topic};
use serde::Serialize;
use tracing::info;

use crate::error::AppError;
use crate::state::AppState;

/// Resolves a signer's key straight from storage — the chain has no
/// separate key registry, an account's `pubkey` column is the only place
/// a signing key for that address is recorded (spec §3.1).
struct StorageKeyResolver<'a> {
    accounts: &'a HashMap<Address, Account>,
}

impl KeyResolver for StorageKeyResolver<'_> {
    fn resolve(&self, addr: &Address) -> Option<meridian_core::types::PublicKeyBytes> {
        self.accounts.get(addr).map(|a| a.pubkey.clone())
    }
}

struct MapLookup<'a>(&'a HashMap<Address, Account>);
impl meridian_chain::AccountLookup for MapLookup<'_> {
    fn nonce(&self, address: &Address) -> u64 {
        self.0.get(address).map(|a| a.nonce).unwrap_or(0)
    }
    fn balance(&self, address: &Address) -> u128 {
        self.0.get(address).map(|a| a.balance).unwrap_or(0)
    }
}

/// `POST /rpc/sendTx` (spec §4.7). Optimistically validates the incoming
/// transaction against current account state and, if it passes, admits it
/// to the shared mempool and persists it as `pending` so a restarted
/// proposer can rehydrate (see `Storage::list_pending_transactions`).
/// Rejected on a read-replica node (`state.mempool` is `None`) since only
/// the proposer-authority process accepts writes.
pub async fn send_tx(State(state): State<AppState>, Json(tx): Json<Transaction>) -> Result<Json<SendTxResponse>, AppError> {
    let mempool = state
        .mempool
        .as_ref()
        .ok_or_else(|| AppError::new(meridian_core::ErrKind::Dependency, "this node does not accept transactions"))?;

    admit_transaction(&state.storage, mempool, &state, tx.clone()).await?;
    state.broker.publish(SyncEvent::NewTx(tx.clone()));
    Ok(Json(SendTxResponse { tx_hash: tx.tx_hash.to_hex() }))
}

/// `POST /rpc/submitReceipt` — an alias for `sendTx` restricted to
/// `RECEIPT_CLAIM` transactions (spec §4.7 "Submit a `RECEIPT_CLAIM`
/// (alias)"). Exists as a distinct, more specific path for callers (the
/// coordinator's relay) that only ever send this one kind.
pub async fn submit_receipt(
    State(state): State<AppState>,
    Json(tx): Json<Transaction>,
) -> Result<Json<SendTxResponse>, AppError> {
    if !matches!(tx.kind, TxKind::ReceiptClaim { .. }) {
        return Err(AppError::validation("submitReceipt only accepts RECEIPT_CLAIM transactions"));
    }
    send_tx(State(state), Json(tx)).await
}

async fn admit_transaction(
    storage: &Storage,
    mempool: &Arc<tokio::sync::Mutex<meridian_chain::Mempool>>,
    state: &AppState,
    tx: Transaction,
) -> Result<(), AppError> {
    if mempool.lock().await.contains(&tx.tx_hash) {
        return Err(AppError::new(meridian_core::ErrKind::Conflict, "transaction already pending"));
    }

    let mut accounts = HashMap::new();
    if let Some(acc) = storage.get_account(&tx.sender).await? {
        accounts.insert(tx.sender.clone(), acc);
    }

    validate_common(&tx, &MapLookup(&accounts), state.min_fee)?;

    if let TxKind::ReceiptClaim { receipt } = &tx.kind {
        let already_included = storage.get_receipt(&receipt.receipt_id).await?.is_some();
        let resolver = StorageKeyResolver { accounts: &accounts };
        validate_receipt_claim(
            receipt,
            &resolver,
            &state.zk_registry,
            &TrustingAttestor,
            already_included,
            &state.economic_bounds,
        )?;
    }

    let mut session = storage.begin().await?;
    session.insert_pending_transaction(&tx).await?;
    session.commit().await?;

    mempool.lock().await.insert(tx);
    Ok(())
}

#[derive(Serialize)]
pub struct SendTxResponse {
    pub tx_hash: String,
}

/// `GET /rpc/getBlock/{n|hash}` (spec §4.7). The path segment is tried as
/// a decimal height first, then as a hex block hash — the spec names both
/// forms under one route rather than two.
pub async fn get_block(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<meridian_core::block::Block>, AppError> {
    let block = if let Ok(height) = id.parse::<u64>() {
        state.storage.get_block_by_height(height).await?
    } else {
        let hash = BlockHash::from_hex(&id)?;
        state.storage.get_block_by_hash(&hash).await?
    };
    block.map(Json).ok_or_else(|| AppError::not_found(format!("no block at {id}")))
}

#[derive(Serialize)]
pub struct HeadResponse {
    pub height: u64,
}

/// `GET /rpc/getHead` (spec §4.7). Also the shape `meridian-sync`'s
/// `HttpRemoteChain::get_head` parses a reply into.
pub async fn get_head(State(state): State<AppState>) -> Result<Json<HeadResponse>, AppError> {
    let height = state.storage.get_head_height().await?.unwrap_or(0);
    Ok(Json(HeadResponse { height }))
}

#[derive(Serialize)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: u128,
    pub nonce: u64,
}

/// `GET /rpc/getBalance/{addr}` (spec §4.7). `{addr}` is hex, matching
/// `Address::to_hex`/`from_hex` — the same encoding every other chain-read
/// route uses for ids, distinct from the base58 form user-facing job/miner
/// surfaces display.
pub async fn get_balance(State(state): State<AppState>, Path(addr): Path<String>) -> Result<Json<BalanceResponse>, AppError> {
    let address = Address::from_hex(&addr)?;
    let account = state.storage.get_account(&address).await?;
    match account {
        Some(a) => Ok(Json(BalanceResponse { address: addr, balance: a.balance, nonce: a.nonce })),
        None => Ok(Json(BalanceResponse { address: addr, balance: 0, nonce: 0 })),
    }
}

/// `GET /rpc/getTx/{hash}` (spec §4.7).
pub async fn get_tx(State(state): State<AppState>, Path(hash): Path<String>) -> Result<Json<Transaction>, AppError> {
    let tx_hash = TxHash::from_hex(&hash)?;
    state
        .storage
        .get_transaction(&tx_hash)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("no transaction {hash}")))
}

/// Consumed by `meridian-chain-node`'s proposer tick to announce a newly
/// produced block on the broker so local `/stream/block` subscribers learn
/// about it without polling.
pub fn announce_block(state: &AppState, block: meridian_core::block::Block) {
    info!(height = block.height, "broadcasting new block to subscribers");
    state.broker.publish(SyncEvent::NewBlock(block));
}

pub fn subscriber_count(state: &AppState, topic: Topic) -> usize {
    state.broker.subscriber_count(topic)
}
