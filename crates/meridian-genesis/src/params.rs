use meridian_core::types::{Address, Balance, PublicKeyBytes};
use serde::{Deserialize, Serialize};

/// An account pre-funded at genesis. Meridian does not pre-mine a fixed
/// supply — all tokens enter circulation through `RECEIPT_CLAIM` minting
/// (spec §4.5) — so `premine` exists only to bootstrap devnet accounts with
/// enough balance to pay transaction fees and escrow before any receipt has
/// been settled.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PremineAccount {
    pub address: Address,
    pub pubkey: PublicKeyBytes,
    pub balance: Balance,
}

/// Chain-wide parameters fixed at genesis (spec §6 configuration table:
/// `CHAIN_ID`, `MINT_PER_UNIT`, `COORDINATOR_RATIO`, `TRUSTED_PROPOSERS`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenesisParams {
    pub chain_id: String,
    pub mint_per_unit: Balance,
    pub coordinator_ratio: f64,
    pub treasury_address: Address,
    pub trusted_proposers: Vec<Address>,
    pub premine: Vec<PremineAccount>,
}

impl GenesisParams {
    /// A minimal devnet configuration: one trusted proposer, a treasury
    /// address with no premine of its own, and no pre-funded accounts
    /// beyond what the caller adds. `make-genesis`/`faucet` callers extend
    /// `premine` before calling [`crate::apply_genesis`].
    pub fn devnet(chain_id: impl Into<String>, treasury_address: Address, proposer: Address) -> Self {
        Self {
            chain_id: chain_id.into(),
            mint_per_unit: meridian_core::DEFAULT_MINT_PER_UNIT,
            coordinator_ratio: meridian_core::DEFAULT_COORDINATOR_RATIO,
            treasury_address,
            trusted_proposers: vec![proposer],
            premine: Vec::new(),
        }
    }
}
