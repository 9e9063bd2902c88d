use meridian_core::ErrKind;
use thiserror::Error;

/// Chain-layer domain errors (spec §4.5, §7). Every variant maps onto the
/// coarse `ErrKind` taxonomy via `kind()`, the same convention
/// `meridian-storage::StorageError` uses.
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid nonce: expected {expected}, got {got}")]
    InvalidNonce { expected: u64, got: u64 },
    #[error("fee {fee} below minimum {min}")]
    FeeTooLow { fee: u128, min: u128 },
    #[error("insufficient balance: need {need}, have {have}")]
    InsufficientBalance { need: u128, have: u128 },
    #[error("receipt verification failed: {0}")]
    ReceiptInvalid(String),
    #[error("receipt already included: {0}")]
    DuplicateReceipt(String),
    #[error("coordinator attestation failed: {0}")]
    AttestationFailed(String),
    #[error("economic bounds violated: {0}")]
    EconomicBounds(String),
    #[error("unknown sender account: {0}")]
    UnknownAccount(String),
    #[error("invalid proposer signature")]
    InvalidProposerSig,
    #[error("untrusted proposer: {0}")]
    UntrustedProposer(String),
    #[error("empty block rejected at height {0}")]
    EmptyBlock(u64),
    #[error("reorg depth {depth} exceeds limit {limit}")]
    ReorgDepthExceeded { depth: u64, limit: u64 },
    #[error("no common ancestor with imported chain")]
    NoCommonAncestor,
    #[error(transparent)]
    Storage(#[from] meridian_storage::StorageError),
}

impl ChainError {
    pub fn kind(&self) -> ErrKind {
        match self {
            ChainError::InvalidSignature
            | ChainError::ReceiptInvalid(_)
            | ChainError::InvalidProposerSig => ErrKind::Integrity,
            ChainError::InvalidNonce { .. }
            | ChainError::FeeTooLow { .. }
            | ChainError::EconomicBounds(_) => ErrKind::Validation,
            ChainError::InsufficientBalance { .. } => ErrKind::Escrow,
            ChainError::DuplicateReceipt(_) => ErrKind::Conflict,
            ChainError::AttestationFailed(_) => ErrKind::Dependency,
            ChainError::UnknownAccount(_) => ErrKind::NotFound,
            ChainError::UntrustedProposer(_)
            | ChainError::EmptyBlock(_)
            | ChainError::ReorgDepthExceeded { .. }
            | ChainError::NoCommonAncestor => ErrKind::Consensus,
            ChainError::Storage(e) => e.kind(),
        }
    }
}
