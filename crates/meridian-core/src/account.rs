use serde::{Deserialize, Serialize};

use crate::types::{Address, Balance, Nonce, PublicKeyBytes};

/// Chain account. Balance is an integer unit count; nonces are strictly
/// monotonic per account (§3.1).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub balance: Balance,
    pub nonce: Nonce,
    pub pubkey: PublicKeyBytes,
}

impl Account {
    pub fn genesis(address: Address, balance: Balance, pubkey: PublicKeyBytes) -> Self {
        Self {
            address,
            balance,
            nonce: 0,
            pubkey,
        }
    }
}
