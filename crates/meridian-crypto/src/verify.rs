use std::collections::HashSet;

use meridian_core::receipt::{ComputeReceipt, ReceiptSignature, SignatureAlg};
use meridian_core::types::{Address, PublicKeyBytes};
use thiserror::Error;

use crate::canonical::sign_bytes;
use crate::keypair::{verify_raw, KeyPair};
use crate::zk::ZkVerifierRegistry;

/// Receipt verification failure kinds (spec §4.1's `ErrKind` for C1).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("malformed receipt payload")]
    BadJson,
    #[error("unknown signature algorithm")]
    BadAlg,
    #[error("signature verification failed")]
    BadSig,
    #[error("fewer than {need} of the required signatures verified (got {got})")]
    UnderThreshold { need: u32, got: u32 },
    #[error("signer {0:?} has no known public key")]
    KeyUnknown(Address),
    #[error("zk proof verification failed")]
    ZkProofFailed,
}

impl VerifyError {
    /// Every receipt-verification failure is `INTEGRITY` in the coarse
    /// taxonomy (spec §7) — fatal for the containing transaction, never
    /// retried.
    pub fn kind(&self) -> meridian_core::ErrKind {
        meridian_core::ErrKind::Integrity
    }
}

/// Resolves a signer's public key from its declared chain address. Backed
/// by the account store in production; tests use a plain `HashMap`.
pub trait KeyResolver {
    fn resolve(&self, addr: &Address) -> Option<PublicKeyBytes>;
}

impl<S: std::hash::BuildHasher> KeyResolver for std::collections::HashMap<Address, PublicKeyBytes, S> {
    fn resolve(&self, addr: &Address) -> Option<PublicKeyBytes> {
        self.get(addr).cloned()
    }
}

/// Sign `receipt`'s canonical sign-bytes with `keypair`, producing one
/// `ReceiptSignature` entry (spec §4.1: `sign(receipt, private_key) →
/// signature`, Ed25519 over `sha256(canonical)`).
pub fn sign(
    receipt: &ComputeReceipt,
    keypair: &KeyPair,
    key_id: impl Into<String>,
) -> Result<ReceiptSignature, VerifyError> {
    let bytes = sign_bytes(receipt).map_err(|_| VerifyError::BadJson)?;
    let sig = keypair.sign(&bytes);
    Ok(ReceiptSignature {
        signer_addr: keypair.address.clone(),
        alg: SignatureAlg::Ed25519,
        key_id: key_id.into(),
        sig: sig.0,
    })
}

/// Validate every signature on `receipt`, enforcing `threshold` distinct
/// valid signatures for multi-sig receipts (spec §3.1, §4.1). A receipt
/// with `threshold == 1` and exactly one valid signature is the
/// conventional single-signer case.
pub fn verify(receipt: &ComputeReceipt, resolver: &dyn KeyResolver) -> Result<(), VerifyError> {
    let bytes = sign_bytes(receipt).map_err(|_| VerifyError::BadJson)?;

    let mut valid_signers: HashSet<Address> = HashSet::new();
    for sig in &receipt.signatures {
        if !matches!(sig.alg, SignatureAlg::Ed25519) {
            return Err(VerifyError::BadAlg);
        }
        let pubkey = resolver
            .resolve(&sig.signer_addr)
            .ok_or_else(|| VerifyError::KeyUnknown(sig.signer_addr.clone()))?;
        let sig_bytes = meridian_core::types::SignatureBytes(sig.sig.clone());
        if verify_raw(&pubkey, &bytes, &sig_bytes).is_ok() {
            valid_signers.insert(sig.signer_addr.clone());
        }
    }

    if (valid_signers.len() as u32) < receipt.threshold {
        return Err(VerifyError::UnderThreshold {
            need: receipt.threshold,
            got: valid_signers.len() as u32,
        });
    }
    if valid_signers.is_empty() {
        return Err(VerifyError::BadSig);
    }
    Ok(())
}

/// Run the declared ZK verifier against `receipt.metadata.zk_proof`, when
/// present. A no-op `Ok(())` when the job did not request privacy (spec
/// §4.1: `verify_zk_proof` — "when metadata.zk_proof is present").
pub fn verify_zk_proof(
    receipt: &ComputeReceipt,
    registry: &ZkVerifierRegistry,
) -> Result<(), VerifyError> {
    let Some(proof) = &receipt.metadata.zk_proof else {
        return Ok(());
    };
    let message = sign_bytes(receipt).map_err(|_| VerifyError::BadJson)?;
    if registry.verify(&proof.scheme, &proof.verifying_key, &message, &proof.proof_bytes) {
        Ok(())
    } else {
        Err(VerifyError::ZkProofFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::receipt::ReceiptMetadata;
    use meridian_core::types::{JobId, ReceiptId};
    use std::collections::HashMap;

    fn sample_receipt() -> ComputeReceipt {
        ComputeReceipt {
            version: 1,
            receipt_id: ReceiptId::from_bytes([1u8; 32]),
            job_id: JobId::from_bytes([2u8; 32]),
            client_addr: Address::from_bytes([3u8; 32]),
            miner_addr: Address::from_bytes([4u8; 32]),
            compute_units: 1000,
            price: 80,
            output_hash: [5u8; 32],
            started_at: 100,
            completed_at: 200,
            metadata: ReceiptMetadata::default(),
            threshold: 1,
            signatures: vec![],
        }
    }

    #[test]
    fn single_sig_round_trip_verifies() {
        let kp = KeyPair::generate();
        let mut r = sample_receipt();
        let sig = sign(&r, &kp, "k1").unwrap();
        r.signatures.push(sig);

        let mut resolver = HashMap::new();
        resolver.insert(kp.address.clone(), kp.public_key.clone());
        assert!(verify(&r, &resolver).is_ok());
    }

    #[test]
    fn tampered_receipt_fails() {
        let kp = KeyPair::generate();
        let mut r = sample_receipt();
        let sig = sign(&r, &kp, "k1").unwrap();
        r.signatures.push(sig);
        r.price = 9999;

        let mut resolver = HashMap::new();
        resolver.insert(kp.address.clone(), kp.public_key.clone());
        assert!(matches!(verify(&r, &resolver), Err(VerifyError::BadSig)));
    }

    #[test]
    fn multisig_two_of_three_passes_with_one_invalid() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let c = KeyPair::generate();
        let mut r = sample_receipt();
        r.threshold = 2;

        let sig_a = sign(&r, &a, "a").unwrap();
        let sig_b = sign(&r, &b, "b").unwrap();
        let mut sig_c = sign(&r, &c, "c").unwrap();
        sig_c.sig[0] ^= 0xFF; // corrupt c's signature

        r.signatures = vec![sig_a, sig_b, sig_c];

        let mut resolver = HashMap::new();
        resolver.insert(a.address.clone(), a.public_key.clone());
        resolver.insert(b.address.clone(), b.public_key.clone());
        resolver.insert(c.address.clone(), c.public_key.clone());

        assert!(verify(&r, &resolver).is_ok());
    }

    #[test]
    fn multisig_under_threshold_fails() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let mut r = sample_receipt();
        r.threshold = 2;

        let sig_a = sign(&r, &a, "a").unwrap();
        r.signatures = vec![sig_a];

        let mut resolver = HashMap::new();
        resolver.insert(a.address.clone(), a.public_key.clone());
        resolver.insert(b.address.clone(), b.public_key.clone());

        assert!(matches!(
            verify(&r, &resolver),
            Err(VerifyError::UnderThreshold { need: 2, got: 1 })
        ));
    }

    #[test]
    fn unknown_signer_key_fails() {
        let a = KeyPair::generate();
        let mut r = sample_receipt();
        let sig_a = sign(&r, &a, "a").unwrap();
        r.signatures = vec![sig_a];

        let resolver: HashMap<Address, PublicKeyBytes> = HashMap::new();
        assert!(matches!(verify(&r, &resolver), Err(VerifyError::KeyUnknown(_))));
    }
}
