use serde::{Deserialize, Serialize};

use crate::receipt::ComputeReceipt;
use crate::types::{Address, Balance, Nonce, PublicKeyBytes, SignatureBytes, Timestamp, TxHash};

/// Authentication scheme a transaction was signed under. `MultiSig` mirrors
/// the account's stored `AuthPolicy`; `k` is the threshold actually
/// asserted by the signer set carried on this transaction (validated
/// against the account's configured threshold at apply time).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum AuthScheme {
    SingleSig,
    MultiSig { k: u32 },
}

/// The payload-specific half of a transaction. `Transfer` and
/// `ReceiptClaim` are the only two kinds the chain accepts (§3.1) — general
/// VM/contract execution is an explicit non-goal.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TxKind {
    Transfer { to: Address, amount: Balance },
    ReceiptClaim { receipt: ComputeReceipt },
}

/// Outcome of re-validating a transaction at block-build time or on
/// inbound gossip.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Included { height: u64 },
    Rejected { reason: String },
}

/// Union of `TRANSFER` and `RECEIPT_CLAIM` (§3.1). `tx_hash` and
/// `signatures` are excluded from the canonical sign-bytes — see
/// `body_bytes`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_hash: TxHash,
    pub sender: Address,
    pub sender_public_key: PublicKeyBytes,
    pub nonce: Nonce,
    pub fee: Balance,
    pub kind: TxKind,
    pub auth_scheme: AuthScheme,
    pub signatures: Vec<SignatureBytes>,
    pub timestamp: Timestamp,
    pub status: TxStatus,
}

/// The portion of a `Transaction` that is hashed/signed. Kept as a
/// separate, narrower type (rather than re-serializing `Transaction` minus
/// a few fields by convention) so it is impossible to accidentally include
/// `tx_hash`/`signatures`/`status` in the signed payload.
#[derive(Serialize)]
pub struct TransactionBody<'a> {
    pub sender: &'a Address,
    pub sender_public_key: &'a PublicKeyBytes,
    pub nonce: Nonce,
    pub fee: Balance,
    pub kind: &'a TxKind,
    pub auth_scheme: &'a AuthScheme,
    pub timestamp: Timestamp,
}

impl Transaction {
    pub fn body(&self) -> TransactionBody<'_> {
        TransactionBody {
            sender: &self.sender,
            sender_public_key: &self.sender_public_key,
            nonce: self.nonce,
            fee: self.fee,
            kind: &self.kind,
            auth_scheme: &self.auth_scheme,
            timestamp: self.timestamp,
        }
    }

    /// Stable bincode encoding of the signable body. Does not include
    /// `tx_hash`, `signatures`, or `status` — those are derived from, or
    /// layered on top of, these bytes.
    pub fn body_bytes(&self) -> Vec<u8> {
        bincode::serialize(&self.body()).expect("TransactionBody serialization is infallible")
    }

    pub fn fee_chronos(&self) -> Balance {
        self.fee
    }
}
