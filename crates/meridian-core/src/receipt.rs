use serde::{Deserialize, Serialize};

use crate::types::{Address, Balance, JobId, ReceiptId, Timestamp};

/// Signature algorithm tag carried alongside each receipt signature.
/// Unknown values must fail verification with `BAD_ALG` rather than be
/// silently ignored (§4.1).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignatureAlg {
    Ed25519,
    #[serde(other)]
    Unknown,
}

/// One signature over a receipt's canonical sign-bytes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReceiptSignature {
    pub signer_addr: Address,
    pub alg: SignatureAlg,
    pub key_id: String,
    /// Raw signature bytes, hex-encoded on the wire.
    #[serde(with = "hex_bytes")]
    pub sig: Vec<u8>,
}

/// Declared ZK-proof attestation, when a job requested privacy (§3.1).
/// The verifying key and scheme are bound to the proof so a verifier can
/// be looked up without out-of-band configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ZkProofAttestation {
    pub scheme: ZkScheme,
    pub verifying_key: String,
    #[serde(with = "hex_bytes")]
    pub proof_bytes: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ZkScheme {
    Groth16,
    Plonk,
    Stark,
}

/// Free-form receipt metadata. `model`/`tokens` are the common fields the
/// spec names explicitly; unknown keys are preserved verbatim on
/// deserialization (forward compatibility, §4.1) via the `extra` map.
/// `zk_proof` and `merkle_anchor` are the two named optional extensions.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReceiptMetadata {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tokens: Option<u64>,
    #[serde(default)]
    pub zk_proof: Option<ZkProofAttestation>,
    #[serde(default)]
    pub merkle_anchor: Option<String>,
    /// Optional opaque ciphertext payload — the minimal unified
    /// representation for confidential-tx use cases (SPEC_FULL §9.4).
    #[serde(default, with = "hex_bytes_opt")]
    pub confidential_payload: Option<Vec<u8>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Canonical attestation that `miner_addr` delivered `job_id` (version 1.0,
/// §3.1). `canonicalize`/`sign`/`verify` live in `meridian-crypto`; this
/// type is the plain data shape both sides of the wire agree on.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComputeReceipt {
    pub version: u32,
    pub receipt_id: ReceiptId,
    pub job_id: JobId,
    pub client_addr: Address,
    pub miner_addr: Address,
    pub compute_units: u64,
    pub price: u64,
    pub output_hash: [u8; 32],
    pub started_at: Timestamp,
    pub completed_at: Timestamp,
    #[serde(default)]
    pub metadata: ReceiptMetadata,
    /// Multi-sig threshold. `1` for a conventional single-signer receipt.
    pub threshold: u32,
    pub signatures: Vec<ReceiptSignature>,
}

impl ComputeReceipt {
    /// Structural invariants from §3.1, independent of signature
    /// verification (that lives in `meridian-crypto::verify`).
    pub fn structural_invariants_hold(&self) -> bool {
        self.completed_at >= self.started_at && self.price > 0 && self.compute_units > 0
    }
}

pub fn total_payout(price: Balance) -> Balance {
    price
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

mod hex_bytes_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_str(&hex::encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let opt = Option::<String>::deserialize(d)?;
        opt.map(|s| hex::decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}
