use std::collections::HashMap;

use meridian_core::account::Account;
use meridian_core::block::Block;
use meridian_core::types::{Address, BlockHash};
use meridian_storage::Storage;

use crate::chain::{apply_transactions, header_hash, ChainParams};
use crate::error::ChainError;

/// Walk `remote_blocks` from the tip backward looking for a height at which
/// its parent hash matches a block already stored locally (spec §4.5 "Fork
/// resolution = longest valid chain"). `None` if no shared ancestor exists
/// within what local storage has retained.
pub async fn common_ancestor(
    storage: &Storage,
    remote_blocks: &[Block],
) -> Result<Option<u64>, ChainError> {
    for block in remote_blocks.iter().rev() {
        if block.height == 0 {
            return Ok(Some(0));
        }
        if let Some(local_parent) = storage.get_block_by_height(block.height - 1).await? {
            if BlockHash::from_bytes(header_hash(&local_parent)) == block.parent {
                return Ok(Some(block.height - 1));
            }
        }
    }
    Ok(None)
}

/// Validate each imported block individually before any reorg is attempted
/// (spec §4.5): non-empty invariant, proposer in the trusted set, and a
/// valid proposer signature resolved against that proposer's on-chain
/// public key.
pub async fn validate_imported_blocks(
    storage: &Storage,
    remote_blocks: &[Block],
    trusted_proposers: &[Address],
) -> Result<(), ChainError> {
    for block in remote_blocks {
        if !block.satisfies_non_empty_invariant() {
            return Err(ChainError::EmptyBlock(block.height));
        }
        if !trusted_proposers.contains(&block.proposer) {
            return Err(ChainError::UntrustedProposer(block.proposer.to_string()));
        }
        let account = storage
            .get_account(&block.proposer)
            .await?
            .ok_or_else(|| ChainError::UntrustedProposer(block.proposer.to_string()))?;
        let hash = header_hash(block);
        let sig = meridian_core::types::SignatureBytes(block.sig.clone());
        meridian_crypto::verify_raw(&account.pubkey, &hash, &sig)
            .map_err(|_| ChainError::InvalidProposerSig)?;
    }
    Ok(())
}

/// Rewind local state to `ancestor_height` and replay `new_blocks` on top
/// (spec §4.5, §8 invariant: post-reorg balance/nonce equal those of a
/// fresh replay from the common ancestor). Rejects the reorg outright if
/// its depth exceeds `reorg_depth_limit` — the boundary is strict: depth
/// equal to the limit is accepted, depth one past it is rejected.
pub async fn rewind_and_replay(
    storage: &Storage,
    local_head: u64,
    ancestor_height: u64,
    new_blocks: &[Block],
    params: &ChainParams,
    reorg_depth_limit: u64,
) -> Result<(), ChainError> {
    let depth = local_head.saturating_sub(ancestor_height);
    if depth > reorg_depth_limit {
        return Err(ChainError::ReorgDepthExceeded {
            depth,
            limit: reorg_depth_limit,
        });
    }

    let mut session = storage.begin().await?;
    session.rewind_to(ancestor_height).await?;

    let mut account_cache: HashMap<Address, Account> = HashMap::new();
    for block in new_blocks {
        for tx in &block.txs {
            if !account_cache.contains_key(&tx.sender) {
                if let Some(acc) = session.get_account(&tx.sender).await? {
                    account_cache.insert(tx.sender.clone(), acc);
                }
            }
        }
        let deltas = apply_transactions(&block.txs, account_cache.clone(), params);
        for delta in &deltas {
            account_cache.insert(delta.address.clone(), delta.clone());
        }
        session.insert_block(block, &deltas).await?;
    }
    session.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::types::{PublicKeyBytes, TxHash};
    use meridian_storage::Storage;

    async fn temp_storage() -> Storage {
        let storage = Storage::connect("sqlite::memory:").await.expect("connect");
        storage.migrate().await.expect("migrate");
        storage
    }

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 32])
    }

    fn block(height: u64, parent: BlockHash, proposer: Address) -> Block {
        Block {
            parent,
            height,
            timestamp: height as i64,
            proposer,
            state_root: [0u8; 32],
            txs: vec![],
            sig: vec![],
        }
    }

    async fn insert_genesis_chain(storage: &Storage, proposer: &Address, up_to_height: u64) -> Vec<Block> {
        let mut chain = Vec::new();
        let mut parent = BlockHash::from_bytes([0u8; 32]);
        for height in 0..=up_to_height {
            let b = block(height, parent.clone(), proposer.clone());
            let mut session = storage.begin().await.unwrap();
            session.insert_block(&b, &[]).await.unwrap();
            session.commit().await.unwrap();
            parent = BlockHash::from_bytes(header_hash(&b));
            chain.push(b);
        }
        chain
    }

    #[tokio::test]
    async fn common_ancestor_finds_shared_height() {
        let storage = temp_storage().await;
        let proposer = addr(1);
        let local = insert_genesis_chain(&storage, &proposer, 2).await;

        // A remote fork that diverges after height 1: one remote block at
        // height 2 whose parent matches the local block at height 1.
        let remote_parent = BlockHash::from_bytes(header_hash(&local[1]));
        let remote_block = block(2, remote_parent, proposer);

        let ancestor = common_ancestor(&storage, &[remote_block]).await.unwrap();
        assert_eq!(ancestor, Some(1));
    }

    #[tokio::test]
    async fn common_ancestor_returns_none_when_no_shared_height_is_retained() {
        let storage = temp_storage().await;
        let proposer = addr(1);
        insert_genesis_chain(&storage, &proposer, 1).await;

        let bogus_parent = BlockHash::from_bytes([0xAB; 32]);
        let remote_block = block(5, bogus_parent, proposer);

        let ancestor = common_ancestor(&storage, &[remote_block]).await.unwrap();
        assert_eq!(ancestor, None);
    }

    #[tokio::test]
    async fn reorg_at_exactly_the_depth_limit_is_applied() {
        let storage = temp_storage().await;
        let params = ChainParams {
            mint_per_unit: 1,
            coordinator_ratio: 0.05,
            treasury_address: addr(9),
            trusted_proposers: vec![],
        };
        let proposer = addr(1);
        insert_genesis_chain(&storage, &proposer, 5).await;

        let new_blocks = vec![block(1, BlockHash::from_bytes([0u8; 32]), proposer.clone())];
        let result = rewind_and_replay(&storage, 5, 0, &new_blocks, &params, 5).await;
        assert!(result.is_ok(), "depth == limit must be accepted: {result:?}");
    }

    #[tokio::test]
    async fn reorg_one_past_the_depth_limit_is_rejected() {
        let storage = temp_storage().await;
        let params = ChainParams {
            mint_per_unit: 1,
            coordinator_ratio: 0.05,
            treasury_address: addr(9),
            trusted_proposers: vec![],
        };

        let err = rewind_and_replay(&storage, 6, 0, &[], &params, 5).await.unwrap_err();
        assert!(matches!(err, ChainError::ReorgDepthExceeded { depth: 6, limit: 5 }));
    }

    #[tokio::test]
    async fn rewind_and_replay_restores_account_balances_to_a_clean_replay() {
        let storage = temp_storage().await;
        let params = ChainParams {
            mint_per_unit: 1,
            coordinator_ratio: 0.05,
            treasury_address: addr(9),
            trusted_proposers: vec![],
        };
        let proposer = addr(1);
        insert_genesis_chain(&storage, &proposer, 3).await;

        let sender = addr(2);
        {
            let mut session = storage.begin().await.unwrap();
            session
                .upsert_account(&Account { address: sender.clone(), balance: 1_000, nonce: 0, pubkey: PublicKeyBytes(vec![]) })
                .await
                .unwrap();
            session.commit().await.unwrap();
        }

        let recipient = addr(3);
        let transfer_tx = meridian_core::transaction::Transaction {
            tx_hash: TxHash::from_bytes([7u8; 32]),
            sender: sender.clone(),
            sender_public_key: PublicKeyBytes(vec![]),
            nonce: 0,
            fee: 1,
            kind: meridian_core::transaction::TxKind::Transfer { to: recipient.clone(), amount: 100 },
            auth_scheme: meridian_core::transaction::AuthScheme::SingleSig,
            signatures: vec![],
            timestamp: 1,
            status: meridian_core::transaction::TxStatus::Pending,
        };
        let mut replay_block = block(1, BlockHash::from_bytes([0u8; 32]), proposer);
        replay_block.txs = vec![transfer_tx];

        rewind_and_replay(&storage, 3, 0, &[replay_block], &params, 64).await.unwrap();

        let sender_account = storage.get_account(&sender).await.unwrap().unwrap();
        let recipient_account = storage.get_account(&recipient).await.unwrap().unwrap();
        assert_eq!(sender_account.balance, 1_000 - 100 - 1);
        assert_eq!(recipient_account.balance, 100);
        assert_eq!(storage.get_head_height().await.unwrap(), Some(1));
    }
}
