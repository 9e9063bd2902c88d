pub mod chain;
pub mod error;
pub mod mempool;
pub mod mint;
pub mod poa;
pub mod reorg;
pub mod validation;

pub use chain::{apply_transactions, compute_state_root, header_hash, ChainParams};
pub use error::ChainError;
pub use mempool::Mempool;
pub use mint::mint_for_receipt;
pub use poa::{run_proposer_loop, ProposerConfig};
pub use reorg::{common_ancestor, rewind_and_replay, validate_imported_blocks};
pub use validation::{
    validate_common, validate_receipt_claim, AccountLookup, CoordinatorAttestor, EconomicBounds,
    TrustingAttestor,
};
