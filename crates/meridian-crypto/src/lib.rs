pub mod canonical;
pub mod hash;
pub mod keypair;
pub mod verify;
pub mod zk;

pub use canonical::{canonicalize, sign_bytes, CanonicalizeError};
pub use hash::{blake3_hash, sha256};
pub use keypair::{address_from_pubkey, verify_raw, KeyPair};
pub use verify::{sign, verify, verify_zk_proof, KeyResolver, VerifyError};
pub use zk::{AllowlistStubVerifier, ZkVerifier, ZkVerifierRegistry};
