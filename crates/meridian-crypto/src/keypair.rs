use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use meridian_core::types::{Address, PublicKeyBytes, SignatureBytes};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::hash::blake3_hash;

/// An Ed25519 keypair with its derived chain `Address`.
///
/// The secret key is held in a `Zeroizing` buffer and wiped on drop — the
/// same discipline the source workspace applied to its Dilithium secret keys.
#[derive(Serialize, Deserialize)]
pub struct KeyPair {
    pub address: Address,
    pub public_key: PublicKeyBytes,
    secret_key: Vec<u8>,
}

impl KeyPair {
    /// Generate a fresh Ed25519 keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(signing_key)
    }

    /// Restore a keypair from a raw 32-byte Ed25519 secret key.
    pub fn from_secret_bytes(sk_bytes: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&sk_bytes);
        Self::from_signing_key(signing_key)
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        let pk_bytes = verifying_key.to_bytes().to_vec();
        let address = address_from_pubkey(&pk_bytes);
        Self {
            address,
            public_key: PublicKeyBytes(pk_bytes),
            secret_key: signing_key.to_bytes().to_vec(),
        }
    }

    /// Sign `message` with this keypair's secret key.
    pub fn sign(&self, message: &[u8]) -> SignatureBytes {
        let sk = Zeroizing::new(self.secret_key.clone());
        let mut sk_arr = [0u8; 32];
        sk_arr.copy_from_slice(&sk[..32]);
        let signing_key = SigningKey::from_bytes(&sk_arr);
        SignatureBytes(signing_key.sign(message).to_bytes().to_vec())
    }

    pub fn secret_key_bytes(&self) -> &[u8] {
        &self.secret_key
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.secret_key.zeroize();
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ address: {:?} }}", self.address)
    }
}

/// Derive a chain `Address` from a raw Ed25519 public key using BLAKE3,
/// matching the source workspace's `AccountId::from(pubkey)` derivation.
pub fn address_from_pubkey(pubkey_bytes: &[u8]) -> Address {
    Address::from_bytes(blake3_hash(pubkey_bytes))
}

/// Verify a raw Ed25519 signature against a public key and message.
pub fn verify_raw(
    public_key: &PublicKeyBytes,
    message: &[u8],
    signature: &SignatureBytes,
) -> Result<(), ed25519_dalek::SignatureError> {
    let mut pk_arr = [0u8; 32];
    pk_arr.copy_from_slice(&public_key.0[..32.min(public_key.0.len())]);
    let verifying_key = VerifyingKey::from_bytes(&pk_arr)?;
    let mut sig_arr = [0u8; 64];
    sig_arr.copy_from_slice(&signature.0[..64.min(signature.0.len())]);
    let sig = ed25519_dalek::Signature::from_bytes(&sig_arr);
    verifying_key.verify_strict(message, &sig)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let kp = KeyPair::generate();
        let msg = b"a delivered compute receipt";
        let sig = kp.sign(msg);
        assert!(verify_raw(&kp.public_key, msg, &sig).is_ok());
    }

    #[test]
    fn tampered_message_fails() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"original");
        assert!(verify_raw(&kp.public_key, b"tampered", &sig).is_err());
    }
}
