use sha2::{Digest, Sha256};

/// SHA-256 of arbitrary bytes. Used for receipt sign-bytes (`sha256(canonical)`,
/// spec §4.1) and block header hashes (spec §3.1) — the two places the spec
/// pins an algorithm explicitly.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// BLAKE3 of arbitrary bytes. Used where the spec leaves the hash primitive
/// unpinned — state root composition (`meridian-chain`), content hashing for
/// job output artifacts.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}
