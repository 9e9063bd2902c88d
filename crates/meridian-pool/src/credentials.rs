use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use crate::error::PoolError;

/// Hashes a miner-supplied API key for storage. Never logs or returns the
/// plaintext key past this call.
pub fn hash_api_key(api_key: &str) -> Result<String, PoolError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(api_key.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|_| PoolError::AuthFailed)
}

/// Verifies a plaintext API key against a stored argon2 hash.
pub fn verify_api_key(api_key: &str, stored_hash: &str) -> Result<(), PoolError> {
    let parsed = PasswordHash::new(stored_hash).map_err(|_| PoolError::AuthFailed)?;
    Argon2::default()
        .verify_password(api_key.as_bytes(), &parsed)
        .map_err(|_| PoolError::AuthFailed)
}

/// Generates an opaque session token handed back by `register`/renewed by
/// `heartbeat`. Not a key material derivation, just an unguessable handle.
pub fn generate_session_token() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}
