use thiserror::Error;

/// Coarse error classification shared across every crate. Used by
/// `meridian-rpc` to pick an HTTP status/JSON shape and by the error
/// propagation policy (retry vs. fatal vs. surfaced-as-4xx).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrKind {
    Validation,
    Auth,
    NotFound,
    Conflict,
    Escrow,
    Dependency,
    Consensus,
    Integrity,
    RateLimit,
}

impl ErrKind {
    /// Whether the core may retry an operation that failed with this kind.
    /// Only `Dependency` failures are retried automatically (backoff on
    /// heartbeats, sync pulls, coordinator attestation calls); everything
    /// else is either a client mistake (4xx, never retried) or fatal for
    /// the containing block/tx.
    pub fn retryable(self) -> bool {
        matches!(self, ErrKind::Dependency)
    }

    /// Whether this kind is fatal for the block/tx that triggered it
    /// (state must not be mutated; the offense counts toward a ban list).
    pub fn is_fatal_for_chain_op(self) -> bool {
        matches!(self, ErrKind::Consensus | ErrKind::Integrity)
    }
}

/// Shared error type for core entity validation (constructing/mutating a
/// `Job`, `Miner`, `ComputeReceipt`, `Transaction`, or `Block` outside of
/// any particular crate's own domain logic). Crates with richer behavior
/// (`meridian-coordinator`, `meridian-pool`, `meridian-chain`, ...) define
/// their own `thiserror` enums and map onto `ErrKind` via a `kind()` method,
/// wrapping `CoreError` where a core-level validation failure bubbles up.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("insufficient balance: need {need}, have {have}")]
    InsufficientBalance { need: u128, have: u128 },

    #[error("invalid nonce: expected {expected}, got {got}")]
    InvalidNonce { expected: u64, got: u64 },

    #[error("invalid signature")]
    InvalidSignature,

    #[error("unknown account: {0}")]
    UnknownAccount(String),

    #[error("self-transfer not allowed")]
    SelfTransfer,

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("price must be greater than zero")]
    ZeroPrice,

    #[error("compute_units must be greater than zero")]
    ZeroComputeUnits,

    #[error("completed_at ({completed_at}) precedes started_at ({started_at})")]
    CompletedBeforeStarted { started_at: i64, completed_at: i64 },

    #[error("multisig threshold not met: need {need}, got {got}")]
    MultisigThresholdNotMet { need: u32, got: u32 },

    #[error("unknown signature algorithm: {0}")]
    UnknownSignatureAlgorithm(String),

    #[error("malformed canonical payload: {0}")]
    MalformedPayload(String),

    #[error("transaction has expired (expires_at is in the past)")]
    TransactionExpired,

    #[error("receipt already included: {0}")]
    DuplicateReceipt(String),

    #[error("{0}")]
    Other(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrKind {
        match self {
            CoreError::InsufficientBalance { .. } => ErrKind::Escrow,
            CoreError::InvalidNonce { .. } => ErrKind::Validation,
            CoreError::InvalidSignature => ErrKind::Integrity,
            CoreError::UnknownAccount(_) => ErrKind::NotFound,
            CoreError::SelfTransfer
            | CoreError::ZeroAmount
            | CoreError::ZeroPrice
            | CoreError::ZeroComputeUnits
            | CoreError::CompletedBeforeStarted { .. }
            | CoreError::TransactionExpired
            | CoreError::MalformedPayload(_) => ErrKind::Validation,
            CoreError::MultisigThresholdNotMet { .. } => ErrKind::Integrity,
            CoreError::UnknownSignatureAlgorithm(_) => ErrKind::Integrity,
            CoreError::DuplicateReceipt(_) => ErrKind::Conflict,
            CoreError::Other(_) => ErrKind::Validation,
        }
    }
}
