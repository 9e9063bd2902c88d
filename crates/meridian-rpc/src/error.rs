use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use meridian_core::ErrKind;
use serde::Serialize;

/// The one JSON error shape every endpoint returns on a non-2xx response
/// (spec §4.7 "returns `{ error: { code, message } }` on non-2xx").
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

/// Maps any crate's domain error onto the coarse taxonomy (spec §7) and an
/// HTTP status, without the caller needing to know which crate's error
/// enum it came from — every `*Error::kind()` already returns an
/// `ErrKind`, so this wraps the kind plus a message rather than the
/// concrete error type.
pub struct AppError {
    kind: ErrKind,
    message: String,
}

impl AppError {
    pub fn new(kind: ErrKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrKind::Validation, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrKind::Auth, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrKind::NotFound, message)
    }

    pub fn rate_limited() -> Self {
        Self::new(ErrKind::RateLimit, "token bucket exhausted")
    }

    fn code(&self) -> &'static str {
        match self.kind {
            ErrKind::Validation => "VALIDATION",
            ErrKind::Auth => "AUTH",
            ErrKind::NotFound => "NOT_FOUND",
            ErrKind::Conflict => "CONFLICT",
            ErrKind::Escrow => "ESCROW",
            ErrKind::Dependency => "DEPENDENCY",
            ErrKind::Consensus => "CONSENSUS",
            ErrKind::Integrity => "INTEGRITY",
            ErrKind::RateLimit => "RATE_LIMIT",
        }
    }

    fn status(&self) -> StatusCode {
        match self.kind {
            ErrKind::Validation => StatusCode::BAD_REQUEST,
            ErrKind::Auth => StatusCode::UNAUTHORIZED,
            ErrKind::NotFound => StatusCode::NOT_FOUND,
            ErrKind::Conflict => StatusCode::CONFLICT,
            ErrKind::Escrow => StatusCode::UNPROCESSABLE_ENTITY,
            ErrKind::Dependency => StatusCode::SERVICE_UNAVAILABLE,
            ErrKind::Consensus | ErrKind::Integrity => StatusCode::BAD_REQUEST,
            ErrKind::RateLimit => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.kind.is_fatal_for_chain_op() {
            tracing::warn!(code = self.code(), message = %self.message, "rejecting chain operation");
        }
        let status = self.status();
        let body = ErrorBody {
            error: ErrorDetail { code: self.code(), message: self.message },
        };
        (status, Json(body)).into_response()
    }
}

macro_rules! from_domain_error {
    ($ty:ty) => {
        impl From<$ty> for AppError {
            fn from(e: $ty) -> Self {
                AppError::new(e.kind(), e.to_string())
            }
        }
    };
}

from_domain_error!(meridian_storage::StorageError);
from_domain_error!(meridian_coordinator::CoordinatorError);
from_domain_error!(meridian_pool::PoolError);
from_domain_error!(meridian_chain::ChainError);
from_domain_error!(meridian_crypto::VerifyError);

impl From<meridian_genesis::GenesisError> for AppError {
    fn from(e: meridian_genesis::GenesisError) -> Self {
        AppError::new(ErrKind::Conflict, e.to_string())
    }
}

impl From<hex::FromHexError> for AppError {
    fn from(e: hex::FromHexError) -> Self {
        AppError::validation(format!("malformed hex: {e}"))
    }
}

impl From<bs58::decode::Error> for AppError {
    fn from(e: bs58::decode::Error) -> Self {
        AppError::validation(format!("malformed address: {e}"))
    }
}
