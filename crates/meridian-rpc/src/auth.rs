use axum::http::HeaderMap;
use jsonwebtoken::{decode, DecodingKey, Validation};
use meridian_core::types::Address;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Claims carried by a client's bearer token (spec §4.7 "Client API key").
/// `sub` is the client's chain address, base58-encoded the same way every
/// other user-facing surface displays addresses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ClientClaims {
    pub sub: String,
    pub exp: usize,
}

/// Wraps the `JWT_SECRET` the spec requires at startup (§6 "REQUIRED for
/// API authentication; absence must fail startup") — verification only;
/// this workspace never mints client tokens itself, it trusts whatever
/// issued them out of band.
pub struct JwtKeys {
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtKeys {
    pub fn from_secret(secret: &str) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(jsonwebtoken::Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<ClientClaims, AppError> {
        decode::<ClientClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| AppError::auth(format!("invalid bearer token: {e}")))
    }
}

/// Extracts `Authorization: Bearer <jwt>` and resolves it to the caller's
/// chain address. Every `/jobs/*` handler calls this first (spec §4.7
/// "Client API key").
pub fn authenticate_client(headers: &HeaderMap, keys: &JwtKeys) -> Result<Address, AppError> {
    let token = bearer_token(headers)?;
    let claims = keys.verify(token)?;
    Address::from_b58(&claims.sub).map_err(|_| AppError::auth("token subject is not a valid address"))
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or_else(|| AppError::auth("missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::auth("Authorization header is not valid UTF-8"))?;
    value
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::auth("Authorization header must be a Bearer token"))
}

/// Extracts the raw `X-Api-Key` header a miner presents to `/miner/register`
/// (spec §4.7 "Miner API key"). Unlike the client JWT this is the
/// long-lived shared secret itself — `meridian_pool::register` hashes and
/// compares it, so the RPC layer only has to pull it out of the request.
pub fn miner_api_key(headers: &HeaderMap) -> Result<&str, AppError> {
    headers
        .get("x-api-key")
        .ok_or_else(|| AppError::auth("missing X-Api-Key header"))?
        .to_str()
        .map_err(|_| AppError::auth("X-Api-Key header is not valid UTF-8"))
}

/// Extracts the `X-Session-Token` a miner presents to every post-registration
/// call (spec §4.7 "Session"). Resolution to a `MinerId` happens in
/// `miner_api` against `Storage::get_miner_by_session`, not here — this
/// module only owns header parsing.
pub fn session_token(headers: &HeaderMap) -> Result<&str, AppError> {
    headers
        .get("x-session-token")
        .ok_or_else(|| AppError::auth("missing X-Session-Token header"))?
        .to_str()
        .map_err(|_| AppError::auth("X-Session-Token header is not valid UTF-8"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token_for(secret: &str, addr: &Address, exp: usize) -> String {
        let claims = ClientClaims { sub: addr.to_b58(), exp };
        encode(&Header::new(jsonwebtoken::Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes()))
            .unwrap()
    }

    #[test]
    fn valid_token_resolves_to_address() {
        let addr = Address::from_bytes([7; 32]);
        let keys = JwtKeys::from_secret("test-secret");
        let token = token_for("test-secret", &addr, 9_999_999_999);
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, format!("Bearer {token}").parse().unwrap());
        let resolved = authenticate_client(&headers, &keys).unwrap();
        assert_eq!(resolved, addr);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let addr = Address::from_bytes([7; 32]);
        let keys = JwtKeys::from_secret("test-secret");
        let token = token_for("other-secret", &addr, 9_999_999_999);
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, format!("Bearer {token}").parse().unwrap());
        assert!(authenticate_client(&headers, &keys).is_err());
    }

    #[test]
    fn missing_header_is_rejected() {
        let keys = JwtKeys::from_secret("test-secret");
        assert!(authenticate_client(&HeaderMap::new(), &keys).is_err());
    }
}
