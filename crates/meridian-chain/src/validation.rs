use meridian_core::receipt::ComputeReceipt;
use meridian_core::transaction::{Transaction, TxKind};
use meridian_core::types::{Address, Balance, JobId, Nonce};
use meridian_crypto::{verify, verify_raw, verify_zk_proof, KeyResolver, ZkVerifierRegistry};

use crate::error::ChainError;

/// Read-only view of account state needed to validate a transaction.
/// Implemented against `meridian-storage::Storage`/`StorageSession` at the
/// call site; a plain `HashMap` stands in for tests.
pub trait AccountLookup {
    fn nonce(&self, address: &Address) -> Nonce;
    fn balance(&self, address: &Address) -> Balance;
}

impl<S: std::hash::BuildHasher> AccountLookup
    for std::collections::HashMap<Address, meridian_core::account::Account, S>
{
    fn nonce(&self, address: &Address) -> Nonce {
        self.get(address).map(|a| a.nonce).unwrap_or(0)
    }
    fn balance(&self, address: &Address) -> Balance {
        self.get(address).map(|a| a.balance).unwrap_or(0)
    }
}

/// Confirms, out of band, that a claimed job existed and its escrow covered
/// the claimed price (spec §4.5 "Coordinator attestation"). A devnet
/// deployment answers trivially; a multi-process deployment asks the
/// coordinator over RPC.
pub trait CoordinatorAttestor {
    fn attest(&self, job_id: &JobId, price: u64) -> Result<bool, ChainError>;
}

/// Always attests true — wired in when the coordinator and chain share a
/// process and escrow/job state is already being validated on the
/// coordinator side before a `RECEIPT_CLAIM` tx is even built.
pub struct TrustingAttestor;
impl CoordinatorAttestor for TrustingAttestor {
    fn attest(&self, _job_id: &JobId, _price: u64) -> Result<bool, ChainError> {
        Ok(true)
    }
}

/// Bounds a `RECEIPT_CLAIM` must fall within to be accepted (spec §4.5
/// "economic bounds on price/compute_units").
#[derive(Clone, Copy, Debug)]
pub struct EconomicBounds {
    pub min_price: u64,
    pub max_price: u64,
    pub min_compute_units: u64,
    pub max_compute_units: u64,
}

impl Default for EconomicBounds {
    fn default() -> Self {
        Self {
            min_price: 1,
            max_price: 1_000_000,
            min_compute_units: 1,
            max_compute_units: 10_000_000,
        }
    }
}

/// Checks shared by every transaction kind (spec §4.5 "Transaction
/// validation"): signature, nonce, fee floor, balance coverage. Dispatches
/// to [`validate_receipt_claim`] for the `RECEIPT_CLAIM` kind via `extra`.
#[allow(clippy::too_many_arguments)]
pub fn validate_common(
    tx: &Transaction,
    accounts: &dyn AccountLookup,
    min_fee: Balance,
) -> Result<(), ChainError> {
    if tx.fee < min_fee {
        return Err(ChainError::FeeTooLow {
            fee: tx.fee,
            min: min_fee,
        });
    }

    let expected_nonce = accounts.nonce(&tx.sender) + 1;
    if tx.nonce != expected_nonce {
        return Err(ChainError::InvalidNonce {
            expected: expected_nonce,
            got: tx.nonce,
        });
    }

    let balance = accounts.balance(&tx.sender);
    let required = match &tx.kind {
        TxKind::Transfer { amount, .. } => tx.fee + amount,
        TxKind::ReceiptClaim { .. } => tx.fee,
    };
    if balance < required {
        return Err(ChainError::InsufficientBalance {
            need: required,
            have: balance,
        });
    }

    // A transaction's authentication is tied to a single declared signer
    // key — `Account` (spec §3.1) carries exactly one `pubkey`, so
    // `AuthScheme::MultiSig` on a chain transaction (as opposed to a
    // receipt's own multi-sig, verified separately) is accepted against
    // that one key; there is no per-account multi-key registry to check a
    // higher threshold against.
    let sig = tx
        .signatures
        .first()
        .ok_or(ChainError::InvalidSignature)?;
    verify_raw(&tx.sender_public_key, &tx.body_bytes(), sig).map_err(|_| ChainError::InvalidSignature)
}

/// `RECEIPT_CLAIM`-specific checks layered on top of [`validate_common`]
/// (spec §4.5): receipt signature/threshold, optional ZK proof, uniqueness,
/// coordinator attestation, economic bounds.
pub fn validate_receipt_claim(
    receipt: &ComputeReceipt,
    resolver: &dyn KeyResolver,
    zk_registry: &ZkVerifierRegistry,
    attestor: &dyn CoordinatorAttestor,
    receipt_already_included: bool,
    bounds: &EconomicBounds,
) -> Result<(), ChainError> {
    if !receipt.structural_invariants_hold() {
        return Err(ChainError::ReceiptInvalid(
            "completed_at/price/compute_units invariant violated".into(),
        ));
    }

    verify(receipt, resolver).map_err(|e| ChainError::ReceiptInvalid(e.to_string()))?;
    verify_zk_proof(receipt, zk_registry).map_err(|e| ChainError::ReceiptInvalid(e.to_string()))?;

    if receipt_already_included {
        return Err(ChainError::DuplicateReceipt(receipt.receipt_id.to_hex()));
    }

    if !attestor.attest(&receipt.job_id, receipt.price)? {
        return Err(ChainError::AttestationFailed(format!(
            "job {} escrow not attested",
            receipt.job_id
        )));
    }

    if receipt.price < bounds.min_price
        || receipt.price > bounds.max_price
        || receipt.compute_units < bounds.min_compute_units
        || receipt.compute_units > bounds.max_compute_units
    {
        return Err(ChainError::EconomicBounds(format!(
            "price={} compute_units={} outside configured bounds",
            receipt.price, receipt.compute_units
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::account::Account;
    use meridian_core::transaction::{AuthScheme, TxStatus};
    use meridian_core::types::PublicKeyBytes;
    use meridian_crypto::KeyPair;
    use std::collections::HashMap;

    fn accounts_with(addr: &Address, balance: Balance, nonce: Nonce, pubkey: PublicKeyBytes) -> HashMap<Address, Account> {
        let mut m = HashMap::new();
        m.insert(
            addr.clone(),
            Account {
                address: addr.clone(),
                balance,
                nonce,
                pubkey,
            },
        );
        m
    }

    fn signed_transfer(kp: &KeyPair, nonce: Nonce, fee: Balance, amount: Balance) -> Transaction {
        let mut tx = Transaction {
            tx_hash: meridian_core::types::TxHash::from_bytes([0; 32]),
            sender: kp.address.clone(),
            sender_public_key: kp.public_key.clone(),
            nonce,
            fee,
            kind: TxKind::Transfer {
                to: Address::from_bytes([9; 32]),
                amount,
            },
            auth_scheme: AuthScheme::SingleSig,
            signatures: vec![],
            timestamp: 0,
            status: TxStatus::Pending,
        };
        let sig = kp.sign(&tx.body_bytes());
        tx.signatures = vec![sig];
        tx
    }

    #[test]
    fn valid_transfer_passes_common_validation() {
        let kp = KeyPair::generate();
        let accounts = accounts_with(&kp.address, 1_000, 0, kp.public_key.clone());
        let tx = signed_transfer(&kp, 1, 5, 100);
        assert!(validate_common(&tx, &accounts, 1).is_ok());
    }

    #[test]
    fn wrong_nonce_is_rejected() {
        let kp = KeyPair::generate();
        let accounts = accounts_with(&kp.address, 1_000, 3, kp.public_key.clone());
        let tx = signed_transfer(&kp, 1, 5, 100);
        assert!(matches!(
            validate_common(&tx, &accounts, 1),
            Err(ChainError::InvalidNonce { expected: 4, got: 1 })
        ));
    }

    #[test]
    fn insufficient_balance_is_rejected() {
        let kp = KeyPair::generate();
        let accounts = accounts_with(&kp.address, 50, 0, kp.public_key.clone());
        let tx = signed_transfer(&kp, 1, 5, 100);
        assert!(matches!(
            validate_common(&tx, &accounts, 1),
            Err(ChainError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn tampered_body_fails_signature_check() {
        let kp = KeyPair::generate();
        let accounts = accounts_with(&kp.address, 1_000, 0, kp.public_key.clone());
        let mut tx = signed_transfer(&kp, 1, 5, 100);
        tx.fee = 999;
        assert!(matches!(
            validate_common(&tx, &accounts, 1),
            Err(ChainError::InvalidSignature)
        ));
    }

    #[test]
    fn fee_below_minimum_is_rejected() {
        let kp = KeyPair::generate();
        let accounts = accounts_with(&kp.address, 1_000, 0, kp.public_key.clone());
        let tx = signed_transfer(&kp, 1, 1, 100);
        assert!(matches!(
            validate_common(&tx, &accounts, 5),
            Err(ChainError::FeeTooLow { .. })
        ));
    }
}
