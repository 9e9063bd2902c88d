use std::collections::HashMap;

use meridian_core::transaction::Transaction;
use meridian_core::types::TxHash;

/// Pending, optimistically-validated transactions awaiting block inclusion
/// (Glossary "Mempool"; spec §4.5/§5). Not internally synchronized — the
/// proposer loop and RPC handlers share one instance behind a single
/// `tokio::sync::Mutex` at the call site.
pub struct Mempool {
    entries: HashMap<TxHash, Entry>,
    arrival_seq: u64,
}

struct Entry {
    tx: Transaction,
    arrival: u64,
}

impl Mempool {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            arrival_seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, hash: &TxHash) -> bool {
        self.entries.contains_key(hash)
    }

    /// Admit a transaction that already passed optimistic validation. `false`
    /// if a transaction with the same hash is already pending.
    pub fn insert(&mut self, tx: Transaction) -> bool {
        if self.entries.contains_key(&tx.tx_hash) {
            return false;
        }
        self.arrival_seq += 1;
        let hash = tx.tx_hash.clone();
        self.entries.insert(
            hash,
            Entry {
                tx,
                arrival: self.arrival_seq,
            },
        );
        true
    }

    pub fn remove(&mut self, hash: &TxHash) -> Option<Transaction> {
        self.entries.remove(hash).map(|e| e.tx)
    }

    /// Drain up to `max_txs` transactions ordered `(fee desc, arrival asc)`
    /// (spec §4.5 step 3), stopping early once the running serialized size
    /// would exceed `max_bytes`. Drained entries are removed from the pool;
    /// a caller whose hard re-validation rejects one must not re-insert it.
    pub fn drain_for_block(&mut self, max_txs: usize, max_bytes: usize) -> Vec<Transaction> {
        let mut ordered: Vec<&TxHash> = self.entries.keys().collect();
        ordered.sort_by(|a, b| {
            let ea = &self.entries[*a];
            let eb = &self.entries[*b];
            eb.tx.fee.cmp(&ea.tx.fee).then(ea.arrival.cmp(&eb.arrival))
        });

        let candidates: Vec<TxHash> = ordered.into_iter().take(max_txs).cloned().collect();
        let mut drained = Vec::new();
        let mut size = 0usize;
        for hash in candidates {
            let body_len = self.entries[&hash].tx.body_bytes().len();
            if size + body_len > max_bytes {
                break;
            }
            size += body_len;
            drained.push(hash);
        }

        drained.into_iter().filter_map(|h| self.remove(&h)).collect()
    }
}

impl Default for Mempool {
    fn default() -> Self {
        Self::new()
    }
}
