//! Chain store: the locally accepted sequence of blocks
//!
//! Blocks are kept in chain order from genesis to tip and indexed by hash.
//! The store only ever grows at the tip or has a contiguous suffix replaced,
//! so every block's `prev_hash` is the hash of the block before it.

use crate::constants::GENESIS_BLOCK_PREV;
use crate::error::{LedgerError, Result};
use crate::types::*;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default)]
pub struct ChainStore {
    blocks: Vec<Block>,
    hashes: Vec<BlockHash>,
    positions: HashMap<BlockHash, usize>,
    tx_positions: HashMap<TxId, usize>,
}

impl ChainStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks on the chain
    pub fn height(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Append `block` at the tip. Its `prev_hash` must be the current tip.
    pub fn append(&mut self, block: Block) -> Result<BlockHash> {
        let tip = self.latest_hash();
        if block.prev_hash != tip {
            return Err(LedgerError::BlockValidation(format!(
                "Block extends {} but the tip is {}",
                block.prev_hash, tip
            )));
        }

        let hash = block.hash();
        if self.positions.contains_key(&hash) {
            return Err(LedgerError::BlockValidation(format!(
                "Block {} is already on the chain",
                hash
            )));
        }
        self.check_unique_transactions(std::slice::from_ref(&block), self.blocks.len())?;

        let position = self.blocks.len();
        for tx in &block.transactions {
            self.tx_positions.insert(tx.id(), position);
        }
        self.positions.insert(hash, position);
        self.hashes.push(hash);
        self.blocks.push(block);

        Ok(hash)
    }

    pub fn get(&self, hash: &BlockHash) -> Result<&Block> {
        self.positions
            .get(hash)
            .map(|&position| &self.blocks[position])
            .ok_or(LedgerError::BlockNotFound(*hash))
    }

    /// Hash of the tip, or `GENESIS_BLOCK_PREV` for an empty chain
    pub fn latest_hash(&self) -> BlockHash {
        self.hashes.last().copied().unwrap_or(GENESIS_BLOCK_PREV)
    }

    pub fn tip(&self) -> Result<&Block> {
        self.blocks.last().ok_or(LedgerError::EmptyChain)
    }

    /// Whether `hash` names a block on the chain. The genesis sentinel is
    /// always known.
    pub fn contains(&self, hash: &BlockHash) -> bool {
        *hash == GENESIS_BLOCK_PREV || self.positions.contains_key(hash)
    }

    /// Zero-based position of `hash` on the chain
    pub fn position(&self, hash: &BlockHash) -> Option<usize> {
        self.positions.get(hash).copied()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn hashes(&self) -> &[BlockHash] {
        &self.hashes
    }

    /// Walk predecessor links starting at `from`, yielding each hash until
    /// the genesis sentinel, `stop` (excluded) or a hash not on the chain.
    pub fn ancestor_walk(&self, from: BlockHash, stop: Option<BlockHash>) -> AncestorWalk<'_> {
        AncestorWalk {
            chain: self,
            cursor: Some(from),
            stop,
        }
    }

    /// Blocks after `ancestor`, oldest first. The genesis sentinel selects
    /// the whole chain.
    pub fn suffix_after(&self, ancestor: &BlockHash) -> Result<&[Block]> {
        Ok(&self.blocks[self.suffix_start(ancestor)?..])
    }

    /// Replace every block after `ancestor` with `blocks`, returning the
    /// removed blocks oldest first.
    ///
    /// The replacement is checked for chain linkage before anything is
    /// modified; on error the store is unchanged.
    pub fn replace_suffix(&mut self, ancestor: &BlockHash, blocks: Vec<Block>) -> Result<Vec<Block>> {
        let start = self.suffix_start(ancestor)?;

        let mut expected_prev = *ancestor;
        let mut new_hashes = Vec::with_capacity(blocks.len());
        for block in &blocks {
            if block.prev_hash != expected_prev {
                return Err(LedgerError::BlockValidation(format!(
                    "Replacement block extends {} instead of {}",
                    block.prev_hash, expected_prev
                )));
            }
            expected_prev = block.hash();
            new_hashes.push(expected_prev);
        }
        self.check_unique_transactions(&blocks, start)?;

        let removed = self.truncate(start);
        for (block, hash) in blocks.into_iter().zip(new_hashes) {
            let position = self.blocks.len();
            for tx in &block.transactions {
                self.tx_positions.insert(tx.id(), position);
            }
            self.positions.insert(hash, position);
            self.hashes.push(hash);
            self.blocks.push(block);
        }

        Ok(removed)
    }

    /// Find a transaction confirmed anywhere on the chain
    pub fn find_transaction(&self, id: &TxId) -> Option<&Transaction> {
        let position = *self.tx_positions.get(id)?;
        self.blocks[position].transactions.iter().find(|tx| tx.id() == *id)
    }

    /// Position of the block confirming transaction `id`
    pub fn transaction_position(&self, id: &TxId) -> Option<usize> {
        self.tx_positions.get(id).copied()
    }

    /// Whether `id` is confirmed in one of the first `len` blocks
    pub fn confirms_before(&self, id: &TxId, len: usize) -> bool {
        self.transaction_position(id).map_or(false, |position| position < len)
    }

    /// `blocks` placed from `start` on must not repeat a transaction id,
    /// neither among themselves nor from the blocks kept before `start`
    fn check_unique_transactions(&self, blocks: &[Block], start: usize) -> Result<()> {
        let mut seen = HashSet::new();
        for tx in blocks.iter().flat_map(|block| &block.transactions) {
            let id = tx.id();
            if self.confirms_before(&id, start) || !seen.insert(id) {
                return Err(LedgerError::BlockValidation(format!(
                    "Transaction {} is already on the chain",
                    id
                )));
            }
        }
        Ok(())
    }

    fn suffix_start(&self, ancestor: &BlockHash) -> Result<usize> {
        if *ancestor == GENESIS_BLOCK_PREV {
            return Ok(0);
        }
        self.position(ancestor)
            .map(|position| position + 1)
            .ok_or(LedgerError::BlockNotFound(*ancestor))
    }

    fn truncate(&mut self, start: usize) -> Vec<Block> {
        let removed: Vec<Block> = self.blocks.drain(start..).collect();
        for hash in self.hashes.drain(start..) {
            self.positions.remove(&hash);
        }
        for block in &removed {
            for tx in &block.transactions {
                self.tx_positions.remove(&tx.id());
            }
        }
        removed
    }
}

/// Lazy walk over predecessor links, see [`ChainStore::ancestor_walk`]
pub struct AncestorWalk<'a> {
    chain: &'a ChainStore,
    cursor: Option<BlockHash>,
    stop: Option<BlockHash>,
}

impl<'a> Iterator for AncestorWalk<'a> {
    type Item = BlockHash;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.cursor.take()?;
        if hash == GENESIS_BLOCK_PREV || Some(hash) == self.stop {
            return None;
        }

        let block = self.chain.get(&hash).ok()?;
        self.cursor = Some(block.prev_hash);
        Some(hash)
    }
}
