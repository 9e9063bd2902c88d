use meridian_core::block::Block;
use meridian_core::transaction::Transaction;
use serde::{Deserialize, Serialize};

/// Topics carried by the in-process broker and any external broker
/// implementation (spec §4.6 `{block, tx}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    Block,
    Tx,
}

/// Payload delivered to a subscriber of a given topic. `Block` carries one
/// full block per delivery; `Tx` carries one transaction per delivery —
/// transactions have no ordering guarantee (the mempool is a bag, spec
/// §4.6), so there is no sequencing concern within this variant beyond
/// delivery happening at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncEvent {
    NewBlock(Block),
    NewTx(Transaction),
}

impl SyncEvent {
    pub fn topic(&self) -> Topic {
        match self {
            SyncEvent::NewBlock(_) => Topic::Block,
            SyncEvent::NewTx(_) => Topic::Tx,
        }
    }
}
