//! meridian-genesis
//!
//! Builds the founding state of a Meridian chain: the height-0 block and
//! any devnet premine accounts, written directly through `meridian-storage`
//! without going through the proposer loop (genesis has no parent and no
//! transactions — it is the one block for which the empty-block invariant
//! is allowed to hold, per `Block::satisfies_non_empty_invariant`).

pub mod params;

pub use params::{GenesisParams, PremineAccount};

use meridian_core::account::Account;
use meridian_core::block::Block;
use meridian_core::types::BlockHash;
use meridian_storage::{Storage, StorageError};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum GenesisError {
    #[error("genesis already applied: chain has a block at height 0")]
    AlreadyInitialized,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Apply genesis to a fresh store. Writes the premine accounts and the
/// height-0 block in one transaction, then returns. Fails with
/// [`GenesisError::AlreadyInitialized`] if a chain head already exists —
/// genesis may run exactly once per store.
pub async fn apply_genesis(storage: &Storage, params: &GenesisParams) -> Result<(), GenesisError> {
    if storage.get_head_height().await?.is_some() {
        return Err(GenesisError::AlreadyInitialized);
    }

    info!(chain_id = %params.chain_id, premine = params.premine.len(), "applying genesis state");

    let accounts: Vec<Account> = params
        .premine
        .iter()
        .map(|p| Account {
            address: p.address.clone(),
            balance: p.balance,
            nonce: 0,
            pubkey: p.pubkey.clone(),
        })
        .collect();

    let state_root = meridian_chain::compute_state_root(&accounts);
    let block = Block {
        parent: BlockHash::from_bytes([0u8; 32]),
        height: 0,
        timestamp: 0,
        proposer: params.treasury_address.clone(),
        state_root,
        txs: Vec::new(),
        sig: Vec::new(),
    };

    let mut session = storage.begin().await?;
    session.insert_block(&block, &accounts).await?;
    session.commit().await?;

    info!("genesis block committed at height 0");
    Ok(())
}

/// Credit an address directly, bypassing the normal transaction flow
/// (spec §6 `faucet`, devnet only). Not part of the genesis transaction at
/// all — a node operator calls this after genesis to top up test accounts.
/// Never exposed over RPC; only reachable from the `faucet` CLI subcommand
/// against a local store.
pub async fn faucet_credit(
    storage: &Storage,
    address: &meridian_core::types::Address,
    pubkey: &meridian_core::types::PublicKeyBytes,
    amount: meridian_core::types::Balance,
) -> Result<(), GenesisError> {
    let mut session = storage.begin().await?;
    let mut account = session.get_account(address).await?.unwrap_or(Account {
        address: address.clone(),
        balance: 0,
        nonce: 0,
        pubkey: pubkey.clone(),
    });
    account.balance = account.balance.saturating_add(amount);
    session.upsert_account(&account).await?;
    session.commit().await?;
    info!(%address, amount, "faucet credit applied");
    Ok(())
}
