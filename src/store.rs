//! In-memory transaction state store.
//!
//! Maps source transaction hash to the shared [`TxState`] for that
//! transaction. Insertion is at-most-once per hash: racing workers that
//! dequeue the same transaction all converge on the originally stored
//! allocation. Terminal entries are retained; reclamation is not required
//! for correctness.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::TxState;

#[derive(Debug, Default)]
pub struct MessageStore {
    txs: Mutex<HashMap<String, Arc<TxState>>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored state for a transaction hash, if any.
    pub fn load(&self, tx_hash: &str) -> Option<Arc<TxState>> {
        self.txs.lock().get(tx_hash).cloned()
    }

    /// Inserts the state if the hash is unseen, otherwise keeps the existing
    /// entry. Returns the canonical entry and whether this call inserted it.
    pub fn store(&self, tx_hash: &str, tx: Arc<TxState>) -> (Arc<TxState>, bool) {
        let mut txs = self.txs.lock();
        match txs.get(tx_hash) {
            Some(existing) => (Arc::clone(existing), false),
            None => {
                txs.insert(tx_hash.to_owned(), Arc::clone(&tx));
                (tx, true)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.txs.lock().len()
    }
}
