//! Ledger state: UTXO set, mempool and the node's own coins
//!
//! The UTXO set follows the adopted chain exactly. The owned-coin map is the
//! subset of UTXO entries paying the local node, each flagged frozen while a
//! pending transaction spends it.

use crate::block::{apply_transaction, revert_transaction};
use crate::mempool::{accept_to_memory_pool, Mempool, MempoolResult};
use crate::types::*;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct LedgerState {
    owner: PublicKey,
    utxo_set: UtxoSet,
    owned: HashMap<TxId, OutputState>,
    mempool: Mempool,
}

impl LedgerState {
    pub fn new(owner: PublicKey) -> Self {
        Self {
            owner,
            utxo_set: UtxoSet::new(),
            owned: HashMap::new(),
            mempool: Mempool::new(),
        }
    }

    pub fn utxo_set(&self) -> &UtxoSet {
        &self.utxo_set
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    /// Coins owned on the adopted chain, including ones a pending
    /// transaction is about to spend
    pub fn balance(&self) -> usize {
        self.owned.len()
    }

    pub fn output_state(&self, id: &TxId) -> Option<OutputState> {
        self.owned.get(id).copied()
    }

    /// An owned coin not yet spent by a pending transaction
    pub fn next_spendable(&self) -> Option<TxId> {
        self.owned
            .iter()
            .find(|(_, state)| **state == OutputState::Spendable)
            .map(|(id, _)| *id)
    }

    /// Mark an owned coin as spent by a pending transaction. Returns false
    /// if the coin is not owned or already frozen.
    pub fn freeze(&mut self, id: &TxId) -> bool {
        match self.owned.get_mut(id) {
            Some(state @ OutputState::Spendable) => {
                *state = OutputState::Frozen;
                true
            }
            _ => false,
        }
    }

    pub fn unfreeze(&mut self, id: &TxId) {
        if let Some(state) = self.owned.get_mut(id) {
            *state = OutputState::Spendable;
        }
    }

    /// Validate `tx` against the UTXO set and mempool and queue it.
    ///
    /// On acceptance the spent coin is frozen if it belongs to this node.
    pub fn submit(&mut self, tx: Transaction) -> MempoolResult {
        let result = accept_to_memory_pool(&tx, &self.utxo_set, &self.mempool);
        match &result {
            MempoolResult::Accepted => {
                if let Some(input) = &tx.input {
                    self.freeze(input);
                }
                self.mempool.insert(tx);
            }
            MempoolResult::Rejected(reason) => {
                debug!(tx = %tx.id(), %reason, "transaction rejected from mempool");
            }
        }
        result
    }

    /// Apply the transactions of a newly adopted block, in block order.
    ///
    /// Confirmed transactions leave the mempool together with any pending
    /// transaction spending the same coin.
    pub fn confirm(&mut self, transactions: &[Transaction]) {
        for tx in transactions {
            let id = tx.id();

            if let Some(input) = &tx.input {
                self.owned.remove(input);
                if let Some(spender) = self.mempool.spender_of(input).copied() {
                    self.mempool.remove(&spender);
                }
            }
            self.mempool.remove(&id);

            apply_transaction(tx, &mut self.utxo_set);
            if tx.output == self.owner {
                self.owned.insert(id, OutputState::Spendable);
            }
        }

        self.prune_mempool();
    }

    /// Undo the transactions of a discarded block, last to first.
    ///
    /// Spent coins come back when `resolve` can still produce the spent
    /// transaction. Undone spends are offered back to the mempool and kept
    /// if they remain executable and conflict with nothing pending.
    pub fn rollback<F>(&mut self, transactions: &[Transaction], resolve: F)
    where
        F: Fn(&TxId) -> Option<Transaction>,
    {
        for tx in transactions.iter().rev() {
            let id = tx.id();
            self.owned.remove(&id);

            if revert_transaction(tx, &mut self.utxo_set, &resolve) {
                if let Some(input) = &tx.input {
                    let restored_to_owner = self
                        .utxo_set
                        .get(input)
                        .map_or(false, |spent| spent.output == self.owner);
                    if restored_to_owner {
                        self.owned.insert(*input, OutputState::Spendable);
                    }
                }
            }
        }

        for tx in transactions.iter().filter(|tx| !tx.is_coinbase()) {
            self.submit(tx.clone());
        }

        self.prune_mempool();
    }

    /// Drop pending transactions whose input is no longer unspent.
    /// Returns the number of transactions dropped.
    pub fn prune_mempool(&mut self) -> usize {
        let utxo_set = &self.utxo_set;
        let dropped = self
            .mempool
            .retain(|tx| tx.input.map_or(false, |input| utxo_set.contains_key(&input)));

        for tx in &dropped {
            debug!(tx = %tx.id(), "pending transaction no longer executable");
        }
        dropped.len()
    }

    /// Empty the mempool and make every owned coin spendable again
    pub fn clear_mempool(&mut self) {
        self.mempool.clear();
        for state in self.owned.values_mut() {
            *state = OutputState::Spendable;
        }
    }
}
