use meridian_core::ErrKind;
use thiserror::Error;

/// Pool Hub domain errors (spec §4.4).
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("api key does not match registered miner")]
    AuthFailed,
    #[error("unknown miner: {0}")]
    NotFound(String),
    #[error("miner {0} is below the trust floor and ineligible for matching")]
    Ineligible(String),
    #[error("session token invalid or expired")]
    InvalidSession,
    #[error(transparent)]
    Storage(#[from] meridian_storage::StorageError),
}

impl PoolError {
    pub fn kind(&self) -> ErrKind {
        match self {
            PoolError::AuthFailed | PoolError::InvalidSession => ErrKind::Auth,
            PoolError::NotFound(_) => ErrKind::NotFound,
            PoolError::Ineligible(_) => ErrKind::Validation,
            PoolError::Storage(e) => e.kind(),
        }
    }
}
