use meridian_core::ErrKind;
use thiserror::Error;

/// Coordinator-layer domain errors (spec §4.3, §7). Every variant maps onto
/// the coarse `ErrKind` taxonomy via `kind()`, the same convention every
/// other crate's error enum uses.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("insufficient funds: need {need}, have {have}")]
    InsufficientFunds { need: u128, have: u128 },

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("miner not found: {0}")]
    MinerNotFound(String),

    #[error("job {job_id} is not in state {expected}")]
    WrongState { job_id: String, expected: &'static str },

    #[error("miner {got} does not match job's assigned miner {expected}")]
    MinerMismatch { expected: String, got: String },

    #[error("client {0} is not the owner of this job")]
    NotOwner(String),

    #[error("no eligible miner found for job {0}")]
    NoEligibleMiner(String),

    #[error("miner result failed structural validation: {0}")]
    InvalidResult(String),

    #[error(transparent)]
    Storage(#[from] meridian_storage::StorageError),

    #[error(transparent)]
    Pool(#[from] meridian_pool::PoolError),

    #[error("receipt signing failed: {0}")]
    Signing(String),

    #[error("receipt claim construction failed: {0}")]
    ReceiptClaim(String),
}

impl CoordinatorError {
    pub fn kind(&self) -> ErrKind {
        match self {
            CoordinatorError::InsufficientFunds { .. } => ErrKind::Escrow,
            CoordinatorError::JobNotFound(_) | CoordinatorError::MinerNotFound(_) => ErrKind::NotFound,
            CoordinatorError::WrongState { .. } => ErrKind::Conflict,
            CoordinatorError::MinerMismatch { .. } | CoordinatorError::NotOwner(_) => ErrKind::Auth,
            CoordinatorError::NoEligibleMiner(_) => ErrKind::Dependency,
            CoordinatorError::InvalidResult(_) => ErrKind::Validation,
            CoordinatorError::Storage(e) => e.kind(),
            CoordinatorError::Pool(e) => e.kind(),
            CoordinatorError::Signing(_) | CoordinatorError::ReceiptClaim(_) => ErrKind::Integrity,
        }
    }

    /// Mirrors `ErrKind::retryable`, except a handful of coordinator-specific
    /// cases (a miner with no alternative candidate) the coarse taxonomy
    /// alone can't distinguish from a genuine dependency outage.
    pub fn retryable(&self) -> bool {
        matches!(self, CoordinatorError::NoEligibleMiner(_)) || self.kind().retryable()
    }
}
