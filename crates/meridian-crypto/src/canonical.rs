use meridian_core::receipt::ComputeReceipt;
use serde_json::Value;

use crate::hash::sha256;

/// Lexicographic-key, whitespace-free JSON encoding of `receipt`, with the
/// `signatures` block omitted (spec §4.1). `serde_json::Map` is a `BTreeMap`
/// by default (no `preserve_order` feature enabled anywhere in the
/// workspace), so `serde_json::to_value` already yields sorted object keys —
/// canonicalization is "serialize, strip `signatures`, re-serialize compact".
pub fn canonicalize(receipt: &ComputeReceipt) -> Result<Vec<u8>, CanonicalizeError> {
    let mut value = serde_json::to_value(receipt).map_err(|e| CanonicalizeError(e.to_string()))?;
    if let Value::Object(ref mut map) = value {
        map.remove("signatures");
    }
    serde_json::to_vec(&value).map_err(|e| CanonicalizeError(e.to_string()))
}

/// The bytes actually signed/verified: `sha256(canonicalize(receipt))`.
pub fn sign_bytes(receipt: &ComputeReceipt) -> Result<[u8; 32], CanonicalizeError> {
    Ok(sha256(&canonicalize(receipt)?))
}

#[derive(Debug, thiserror::Error)]
#[error("malformed receipt payload: {0}")]
pub struct CanonicalizeError(pub String);

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_core::receipt::{ReceiptMetadata, SignatureAlg};
    use meridian_core::types::{Address, JobId, ReceiptId};

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
            metadata: ReceiptMetadata {
                model: Some("llama-3".into()),
                tokens: Some(1000),
                ..Default::default()
            },
            threshold: 1,
            signatures: vec![],
        }
    }

    #[test]
    fn canonical_form_excludes_signatures_and_is_order_independent() {
        let mut r = sample_receipt();
        let c1 = canonicalize(&r).unwrap();

        r.signatures.push(meridian_core::receipt::ReceiptSignature {
            signer_addr: Address::from_bytes([9u8; 32]),
            alg: SignatureAlg::Ed25519,
            key_id: "k1".into(),
            sig: vec![1, 2, 3],
        });
        let c2 = canonicalize(&r).unwrap();

        // canonicalize ∘ parse ∘ canonicalize = canonicalize (spec §8),
        // and signatures never affect the canonical bytes.
        assert_eq!(c1, c2);
    }

    #[test]
    fn canonicalize_is_idempotent_under_reparse() {
        let r = sample_receipt();
        let c1 = canonicalize(&r).unwrap();
        let reparsed: ComputeReceipt = serde_json::from_slice(&c1).unwrap();
        let c2 = canonicalize(&reparsed).unwrap();
        assert_eq!(c1, c2);
    }
}
