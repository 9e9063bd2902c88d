use std::collections::HashMap;

use meridian_core::receipt::ZkScheme;

/// A pluggable ZK proof verifier, registered at startup rather than loaded
/// dynamically (spec §9: "Strategy interfaces registered at startup; no
/// runtime code load"). Each scheme (Groth16 | PLONK | STARK) gets its own
/// verifier instance behind this trait, so swapping a verifying backend
/// never touches `meridian-chain` or `meridian-coordinator` call sites.
pub trait ZkVerifier: Send + Sync {
    /// Verify `proof_bytes` against `verifying_key` for the given `message`
    /// (the receipt's sign-bytes). Returns `false` on any verification
    /// failure — callers treat that as fatal for the containing transaction.
    fn verify(&self, verifying_key: &str, message: &[u8], proof_bytes: &[u8]) -> bool;
}

/// A verifier that accepts any non-empty proof for a verifying key present
/// in its allowlist. Stands in for an actual Groth16/PLONK/STARK verifying
/// circuit, which is out of scope for this workspace (no SNARK-proving
/// crate is part of the dependency stack) — this keeps the `RECEIPT_CLAIM`
/// zk-proof code path exercisable end to end without embedding a
/// cryptographic library the spec never names.
pub struct AllowlistStubVerifier {
    known_keys: Vec<String>,
}

impl AllowlistStubVerifier {
    pub fn new(known_keys: Vec<String>) -> Self {
        Self { known_keys }
    }
}

impl ZkVerifier for AllowlistStubVerifier {
    fn verify(&self, verifying_key: &str, _message: &[u8], proof_bytes: &[u8]) -> bool {
        !proof_bytes.is_empty() && self.known_keys.iter().any(|k| k == verifying_key)
    }
}

/// Scheme → verifier lookup. Built once at node startup and handed to
/// `meridian-chain`'s transaction validator and `meridian-coordinator`'s
/// receipt issuance path.
pub struct ZkVerifierRegistry {
    verifiers: HashMap<ZkScheme, Box<dyn ZkVerifier>>,
}

impl ZkVerifierRegistry {
    pub fn new() -> Self {
        Self {
            verifiers: HashMap::new(),
        }
    }

    pub fn register(&mut self, scheme: ZkScheme, verifier: Box<dyn ZkVerifier>) {
        self.verifiers.insert(scheme, verifier);
    }

    /// Devnet registry with an allowlist stub verifier for every scheme.
    pub fn devnet(known_keys: Vec<String>) -> Self {
        let mut registry = Self::new();
        for scheme in [ZkScheme::Groth16, ZkScheme::Plonk, ZkScheme::Stark] {
            registry.register(
                scheme,
                Box::new(AllowlistStubVerifier::new(known_keys.clone())),
            );
        }
        registry
    }

    pub fn verify(&self, scheme: &ZkScheme, verifying_key: &str, message: &[u8], proof: &[u8]) -> bool {
        match self.verifiers.get(scheme) {
            Some(v) => v.verify(verifying_key, message, proof),
            None => false,
        }
    }
}

impl Default for ZkVerifierRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ZkScheme needs Eq + Hash for the registry map key.
impl std::hash::Hash for ZkScheme {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
    }
}
