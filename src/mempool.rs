//! Mempool: transactions accepted locally but not yet on the chain

use crate::transaction::check_transaction_signature;
use crate::types::*;
use std::collections::{HashMap, HashSet};

/// Ordered pool of pending transactions.
///
/// Indexed by transaction id and by spent input, so that no two entries can
/// spend the same coin.
#[derive(Debug, Clone, Default)]
pub struct Mempool {
    entries: Vec<Transaction>,
    ids: HashSet<TxId>,
    spenders: HashMap<TxId, TxId>,
}

/// Result of mempool acceptance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MempoolResult {
    Accepted,
    Rejected(String),
}

impl MempoolResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, MempoolResult::Accepted)
    }
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &TxId) -> bool {
        self.ids.contains(id)
    }

    /// Id of the pending transaction spending `input`, if any
    pub fn spender_of(&self, input: &TxId) -> Option<&TxId> {
        self.spenders.get(input)
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.entries
    }

    /// The `count` oldest transactions
    pub fn take(&self, count: usize) -> Vec<Transaction> {
        self.entries.iter().take(count).cloned().collect()
    }

    /// Insert without validation; callers run [`accept_to_memory_pool`] first
    pub(crate) fn insert(&mut self, tx: Transaction) {
        let id = tx.id();
        if let Some(input) = tx.input {
            self.spenders.insert(input, id);
        }
        self.ids.insert(id);
        self.entries.push(tx);
    }

    pub fn remove(&mut self, id: &TxId) -> Option<Transaction> {
        if !self.ids.contains(id) {
            return None;
        }

        let index = self.entries.iter().position(|tx| tx.id() == *id)?;
        let tx = self.entries.remove(index);
        self.ids.remove(id);
        if let Some(input) = &tx.input {
            self.spenders.remove(input);
        }
        Some(tx)
    }

    /// Keep only the transactions matching `keep`, returning the dropped ones
    pub fn retain<F>(&mut self, mut keep: F) -> Vec<Transaction>
    where
        F: FnMut(&Transaction) -> bool,
    {
        let (kept, dropped): (Vec<Transaction>, Vec<Transaction>) =
            self.entries.drain(..).partition(|tx| keep(tx));

        for tx in &dropped {
            self.ids.remove(&tx.id());
            if let Some(input) = &tx.input {
                self.spenders.remove(input);
            }
        }
        self.entries = kept;
        dropped
    }

    pub fn clear(&mut self) -> Vec<Transaction> {
        self.ids.clear();
        self.spenders.clear();
        std::mem::take(&mut self.entries)
    }
}

/// AcceptToMemoryPool: 𝒯𝒳 × 𝒰𝒮 × ℳ → {accepted, rejected}
///
/// For transaction tx, UTXO set us and mempool mp:
/// 1. tx is not a coinbase (coinbases only enter the chain through mining)
/// 2. tx ∉ mp
/// 3. tx.input ∈ us
/// 4. tx is signed by the owner of us(tx.input)
/// 5. no entry of mp spends tx.input
pub fn accept_to_memory_pool(tx: &Transaction, utxo_set: &UtxoSet, mempool: &Mempool) -> MempoolResult {
    // 1. Money creation never travels through the mempool
    let input = match &tx.input {
        Some(input) => input,
        None => {
            return MempoolResult::Rejected("Transaction without input is malformed".to_string());
        }
    };

    // 2. Check if transaction is already in mempool
    let tx_id = tx.id();
    if mempool.contains(&tx_id) {
        return MempoolResult::Rejected("Transaction already in mempool".to_string());
    }

    // 3-4. Input is unspent and signature matches its owner
    if let ValidationResult::Invalid(reason) = check_transaction_signature(tx, utxo_set) {
        return MempoolResult::Rejected(reason);
    }

    // 5. Check for conflicts with existing mempool transactions
    if let Some(spender) = mempool.spender_of(input) {
        return MempoolResult::Rejected(format!("Input {} already spent by pending {}", input, spender));
    }

    MempoolResult::Accepted
}
