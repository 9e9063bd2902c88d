use meridian_core::ErrKind;
use thiserror::Error;

/// Storage-layer domain errors. `sqlx::Error` is wrapped rather than
/// propagated directly so callers above this crate never need to match on
/// driver-specific error variants.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate `receipt_id` insertion — the unique index on `receipts`
    /// rejected it (spec §4.2 discipline rule 2). Named "replay" per the
    /// spec's own vocabulary (§8: `submitReceipt(r)` after inclusion
    /// returns `CONFLICT`).
    #[error("replay: receipt {0} already recorded")]
    ReplayedReceipt(String),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StorageError {
    pub fn kind(&self) -> ErrKind {
        match self {
            StorageError::NotFound(_) => ErrKind::NotFound,
            StorageError::ReplayedReceipt(_) | StorageError::Duplicate(_) => ErrKind::Conflict,
            StorageError::InvalidTransition(_) => ErrKind::Validation,
            StorageError::Database(_) | StorageError::Migration(_) | StorageError::Serde(_) => {
                ErrKind::Dependency
            }
        }
    }
}
