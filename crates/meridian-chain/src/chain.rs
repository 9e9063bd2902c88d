use std::collections::HashMap;

use meridian_core::account::Account;
use meridian_core::block::Block;
use meridian_core::transaction::{Transaction, TxKind};
use meridian_core::types::{Address, Balance, PublicKeyBytes};

use crate::mint::mint_for_receipt;

/// Chain-wide parameters set at genesis and fixed for the life of the chain
/// (spec §4.5, §6: `MINT_PER_UNIT`, `COORDINATOR_RATIO`, trusted proposers).
#[derive(Clone, Debug)]
pub struct ChainParams {
    pub mint_per_unit: Balance,
    pub coordinator_ratio: f64,
    pub treasury_address: Address,
    pub trusted_proposers: Vec<Address>,
}

/// Header hash = `sha256(parent | height | timestamp | proposer |
/// state_root)` (spec §3.1, §4.5). The proposer signs over this hash.
pub fn header_hash(block: &Block) -> [u8; 32] {
    let mut buf = Vec::with_capacity(32 + 8 + 8 + 32 + 32);
    buf.extend_from_slice(block.parent.as_bytes());
    buf.extend_from_slice(&block.height.to_be_bytes());
    buf.extend_from_slice(&block.timestamp.to_be_bytes());
    buf.extend_from_slice(block.proposer.as_bytes());
    buf.extend_from_slice(&block.state_root);
    meridian_crypto::sha256(&buf)
}

/// BLAKE3 over every touched account's `(address, balance, nonce)`, sorted
/// by address hex so the root is a pure function of final state, not of
/// application order.
pub fn compute_state_root(accounts: &[Account]) -> [u8; 32] {
    let mut entries: Vec<(String, Balance, u64)> = accounts
        .iter()
        .map(|a| (a.address.to_hex(), a.balance, a.nonce))
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    let mut buf = Vec::new();
    for (addr_hex, balance, nonce) in entries {
        buf.extend_from_slice(addr_hex.as_bytes());
        buf.extend_from_slice(&balance.to_be_bytes());
        buf.extend_from_slice(&nonce.to_be_bytes());
    }
    meridian_crypto::blake3_hash(&buf)
}

fn get_or_create<'a>(
    accounts: &'a mut HashMap<Address, Account>,
    address: &Address,
    pubkey: &PublicKeyBytes,
) -> &'a mut Account {
    accounts.entry(address.clone()).or_insert_with(|| Account {
        address: address.clone(),
        balance: 0,
        nonce: 0,
        pubkey: pubkey.clone(),
    })
}

/// Apply a hard-re-validated set of transactions to a snapshot of the
/// accounts they touch, returning every account whose balance or nonce
/// changed (spec §4.5 step 5). Pure and synchronous so it can run before a
/// storage transaction opens; `StorageSession::insert_block` persists the
/// result atomically with the block row.
pub fn apply_transactions(
    txs: &[Transaction],
    mut accounts: HashMap<Address, Account>,
    params: &ChainParams,
) -> Vec<Account> {
    let empty_key = PublicKeyBytes(vec![]);
    let mut touched: std::collections::HashSet<Address> = std::collections::HashSet::new();

    for tx in txs {
        {
            let sender = get_or_create(&mut accounts, &tx.sender, &tx.sender_public_key);
            sender.nonce = tx.nonce;
            sender.balance = sender.balance.saturating_sub(tx.fee);
        }
        touched.insert(tx.sender.clone());

        match &tx.kind {
            TxKind::Transfer { to, amount } => {
                {
                    let sender = accounts.get_mut(&tx.sender).expect("just inserted above");
                    sender.balance = sender.balance.saturating_sub(*amount);
                }
                let recipient = get_or_create(&mut accounts, to, &empty_key);
                recipient.balance = recipient.balance.saturating_add(*amount);
                touched.insert(to.clone());
            }
            TxKind::ReceiptClaim { receipt } => {
                let (miner_mint, coord_mint) = mint_for_receipt(
                    receipt.compute_units,
                    params.mint_per_unit,
                    params.coordinator_ratio,
                );
                let miner = get_or_create(&mut accounts, &receipt.miner_addr, &empty_key);
                miner.balance = miner.balance.saturating_add(miner_mint);
                touched.insert(receipt.miner_addr.clone());
                let treasury = get_or_create(&mut accounts, &params.treasury_address, &empty_key);
                treasury.balance = treasury.balance.saturating_add(coord_mint);
                touched.insert(params.treasury_address.clone());
            }
        }
    }

    accounts
        .into_iter()
        .filter(|(addr, _)| touched.contains(addr))
        .map(|(_, account)| account)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::receipt::{ComputeReceipt, ReceiptMetadata};
    use meridian_core::transaction::{AuthScheme, TxStatus};
    use meridian_core::types::{JobId, ReceiptId, TxHash};

    fn params() -> ChainParams {
        ChainParams {
            mint_per_unit: 1,
            coordinator_ratio: 0.05,
            treasury_address: Address::from_bytes([99; 32]),
            trusted_proposers: vec![],
        }
    }

    fn transfer(sender: Address, to: Address, amount: Balance, fee: Balance, nonce: u64) -> Transaction {
        Transaction {
            tx_hash: TxHash::from_bytes([0; 32]),
            sender,
            sender_public_key: PublicKeyBytes(vec![]),
            nonce,
            fee,
            kind: TxKind::Transfer { to, amount },
            auth_scheme: AuthScheme::SingleSig,
            signatures: vec![],
            timestamp: 0,
            status: TxStatus::Pending,
        }
    }

    #[test]
    fn transfer_debits_sender_and_credits_recipient() {
        let sender_addr = Address::from_bytes([1; 32]);
        let recipient_addr = Address::from_bytes([2; 32]);
        let bystander_addr = Address::from_bytes([3; 32]);
        let mut accounts = HashMap::new();
        accounts.insert(
            sender_addr.clone(),
            Account {
                address: sender_addr.clone(),
                balance: 1_000,
                nonce: 0,
                pubkey: PublicKeyBytes(vec![1]),
            },
        );
        accounts.insert(
            bystander_addr.clone(),
            Account {
                address: bystander_addr.clone(),
                balance: 500,
                nonce: 0,
                pubkey: PublicKeyBytes(vec![2]),
            },
        );

        let tx = transfer(sender_addr.clone(), recipient_addr.clone(), 100, 5, 1);
        let deltas = apply_transactions(&[tx], accounts, &params());

        let sender = deltas.iter().find(|a| a.address == sender_addr).unwrap();
        assert_eq!(sender.balance, 1_000 - 100 - 5);
        assert_eq!(sender.nonce, 1);
        let recipient = deltas.iter().find(|a| a.address == recipient_addr).unwrap();
        assert_eq!(recipient.balance, 100);
        assert!(
            !deltas.iter().any(|a| a.address == bystander_addr),
            "an account untouched by the batch must not appear in its deltas"
        );
    }

    #[test]
    fn receipt_claim_mints_to_miner_and_treasury() {
        let sender_addr = Address::from_bytes([1; 32]);
        let miner_addr = Address::from_bytes([2; 32]);
        let mut accounts = HashMap::new();
        accounts.insert(
            sender_addr.clone(),
            Account {
                address: sender_addr.clone(),
                balance: 1_000,
                nonce: 0,
                pubkey: PublicKeyBytes(vec![1]),
            },
        );

        let receipt = ComputeReceipt {
            version: 1,
            receipt_id: ReceiptId::from_bytes([3; 32]),
            job_id: JobId::from_bytes([4; 32]),
            client_addr: sender_addr.clone(),
            miner_addr: miner_addr.clone(),
            compute_units: 1_000,
            price: 80,
            output_hash: [0; 32],
            started_at: 0,
            completed_at: 1,
            metadata: ReceiptMetadata::default(),
            threshold: 1,
            signatures: vec![],
        };
        let mut tx = transfer(sender_addr.clone(), miner_addr.clone(), 0, 5, 1);
        tx.kind = TxKind::ReceiptClaim { receipt };

        let deltas = apply_transactions(&[tx], accounts, &params());
        let miner = deltas.iter().find(|a| a.address == miner_addr).unwrap();
        assert_eq!(miner.balance, 950);
        let treasury = deltas.iter().find(|a| a.address == Address::from_bytes([99; 32])).unwrap();
        assert_eq!(treasury.balance, 50);
    }

    #[test]
    fn state_root_is_order_independent() {
        let a = Account {
            address: Address::from_bytes([1; 32]),
            balance: 10,
            nonce: 1,
            pubkey: PublicKeyBytes(vec![]),
        };
        let b = Account {
            address: Address::from_bytes([2; 32]),
            balance: 20,
            nonce: 2,
            pubkey: PublicKeyBytes(vec![]),
        };
        let root_ab = compute_state_root(&[a.clone(), b.clone()]);
        let root_ba = compute_state_root(&[b, a]);
        assert_eq!(root_ab, root_ba);
    }
}
