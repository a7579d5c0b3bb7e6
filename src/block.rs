//! Block construction, validation and UTXO application

use crate::constants::*;
use crate::crypto::sha256_hash;
use crate::transaction::check_transaction_signature;
use crate::types::*;
use std::collections::{HashMap, HashSet};

impl Block {
    pub fn new(prev_hash: BlockHash, transactions: Vec<Transaction>) -> Self {
        Self {
            prev_hash,
            transactions,
        }
    }

    /// Block with no predecessor
    pub fn with_genesis_parent(transactions: Vec<Transaction>) -> Self {
        Self::new(GENESIS_BLOCK_PREV, transactions)
    }

    /// BlockHash = SHA256(txid_1 ∥ ... ∥ txid_n ∥ prev_hash)
    ///
    /// Recomputed from the contained transactions on every call, so a
    /// transaction altered in place yields a different hash.
    pub fn hash(&self) -> BlockHash {
        let mut data = Vec::with_capacity(32 * (self.transactions.len() + 1));
        for tx in &self.transactions {
            data.extend_from_slice(tx.id().as_bytes());
        }
        data.extend_from_slice(self.prev_hash.as_bytes());
        BlockHash(sha256_hash(&data))
    }

    pub fn coinbase_count(&self) -> usize {
        self.transactions.iter().filter(|tx| tx.is_coinbase()).count()
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::with_genesis_parent(Vec::new())
    }
}

/// CheckBlockStructure: ℬ × ℕ → {valid, invalid}
///
/// A block b is structurally valid iff:
/// 1. |b.txs| ≤ block_size
/// 2. exactly one tx ∈ b.txs is a coinbase
pub fn check_block_structure(block: &Block, block_size: usize) -> ValidationResult {
    // 1. Size limit
    if block.transactions.len() > block_size {
        return ValidationResult::Invalid(format!(
            "Block holds {} transactions, limit is {}",
            block.transactions.len(),
            block_size
        ));
    }

    // 2. Exactly one money-creation transaction
    let coinbase_count = block.coinbase_count();
    if coinbase_count != 1 {
        return ValidationResult::Invalid(format!(
            "Block must contain exactly one coinbase transaction, found {}",
            coinbase_count
        ));
    }

    ValidationResult::Valid
}

/// ConnectBlock: ℬ × ℍ × 𝒰𝒮 × ℕ → {valid, invalid} × 𝒰𝒮
///
/// For block b fetched under hash h on top of UTXO set us:
/// 1. b.hash() = h
/// 2. b is structurally valid
/// 3. No tx ∈ b repeats the id of a coin in us or of an earlier tx of b
/// 4. Every spending tx ∈ b resolves its input in us (or in an earlier tx of b)
///    that no earlier tx of b consumed, and is signed by that coin's owner
/// 5. Apply all transactions: us' = ApplyTransactions(b.txs, us)
/// 5. Return (valid, us')
///
/// On failure the UTXO set is returned untouched.
pub fn connect_block(
    block: &Block,
    expected_hash: &BlockHash,
    mut utxo_set: UtxoSet,
    block_size: usize,
) -> (ValidationResult, UtxoSet) {
    // 1. The block must be the one that was asked for
    let actual_hash = block.hash();
    if &actual_hash != expected_hash {
        return (
            ValidationResult::Invalid(format!(
                "Block hash mismatch: expected {}, computed {}",
                expected_hash, actual_hash
            )),
            utxo_set,
        );
    }

    // 2. Structure
    let structure = check_block_structure(block, block_size);
    if !structure.is_valid() {
        return (structure, utxo_set);
    }

    // 3-4. Unique ids, inputs and signatures, tracking coins created and consumed inside the block
    let mut created: HashMap<TxId, &Transaction> = HashMap::new();
    let mut consumed: HashSet<TxId> = HashSet::new();

    for (i, tx) in block.transactions.iter().enumerate() {
        let id = tx.id();
        if utxo_set.contains_key(&id) || created.contains_key(&id) {
            return (
                ValidationResult::Invalid(format!("Transaction {} repeats existing transaction {}", i, id)),
                utxo_set,
            );
        }

        if let Some(input) = &tx.input {
            if consumed.contains(input) {
                return (
                    ValidationResult::Invalid(format!(
                        "Transaction {} double-spends {} inside the block",
                        i, input
                    )),
                    utxo_set,
                );
            }

            let result = match created.get(input) {
                Some(earlier) => {
                    let mut local = UtxoSet::new();
                    local.insert(*input, (*earlier).clone());
                    check_transaction_signature(tx, &local)
                }
                None => check_transaction_signature(tx, &utxo_set),
            };

            if let ValidationResult::Invalid(reason) = result {
                return (
                    ValidationResult::Invalid(format!("Invalid transaction at index {}: {}", i, reason)),
                    utxo_set,
                );
            }

            consumed.insert(*input);
        }

        created.insert(id, tx);
    }

    // 5. Apply
    for tx in &block.transactions {
        apply_transaction(tx, &mut utxo_set);
    }

    (ValidationResult::Valid, utxo_set)
}

/// ApplyTransaction: us' = (us \ {tx.input}) ∪ {tx.id ↦ tx}
pub fn apply_transaction(tx: &Transaction, utxo_set: &mut UtxoSet) {
    if let Some(input) = &tx.input {
        utxo_set.remove(input);
    }
    utxo_set.insert(tx.id(), tx.clone());
}

/// RevertTransaction: us' = (us \ {tx.id}) ∪ {tx.input ↦ resolve(tx.input)}
///
/// The spent coin is restored only when `resolve` can still produce it.
/// Returns false if the input could not be resolved.
pub fn revert_transaction<F>(tx: &Transaction, utxo_set: &mut UtxoSet, resolve: F) -> bool
where
    F: Fn(&TxId) -> Option<Transaction>,
{
    utxo_set.remove(&tx.id());

    match &tx.input {
        Some(input) => match resolve(input) {
            Some(spent) => {
                utxo_set.insert(*input, spent);
                true
            }
            None => false,
        },
        None => true,
    }
}

/// DisconnectBlock: inverse of ConnectBlock, reverting transactions last to first
pub fn disconnect_block<F>(block: &Block, mut utxo_set: UtxoSet, resolve: F) -> UtxoSet
where
    F: Fn(&TxId) -> Option<Transaction>,
{
    for tx in block.transactions.iter().rev() {
        revert_transaction(tx, &mut utxo_set, &resolve);
    }
    utxo_set
}
