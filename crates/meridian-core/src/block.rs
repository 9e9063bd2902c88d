use serde::{Deserialize, Serialize};

use crate::transaction::Transaction;
use crate::types::{Address, BlockHash, Timestamp};

/// PoA-authored block header + body (§3.1). Header hash =
/// `sha256(parent | height | timestamp | proposer | state_root)`; the
/// block is signed by the designated proposer over that hash.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    pub parent: BlockHash,
    pub height: u64,
    pub timestamp: Timestamp,
    pub proposer: Address,
    pub state_root: [u8; 32],
    pub txs: Vec<Transaction>,
    /// Ed25519 signature over the header hash, by `proposer`.
    #[serde(with = "sig_bytes")]
    pub sig: Vec<u8>,
}

impl Block {
    /// `len(b.txs) >= 1` for every block with height > 0 — empty blocks
    /// are forbidden by the mempool-gated proposer loop (§4.5).
    pub fn satisfies_non_empty_invariant(&self) -> bool {
        self.height == 0 || !self.txs.is_empty()
    }
}

mod sig_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}
