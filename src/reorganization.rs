//! Fork resolution: block synchronization and chain reorganization
//!
//! When a peer announces a tip hash the node does not know:
//! 1. Fetch the unknown suffix from the announcer, walking `prev_hash` links
//!    back until a locally known block (the common ancestor) is reached
//! 2. Rebuild the UTXO set as it stood at the common ancestor
//! 3. Validate the suffix block by block against that snapshot, truncating at
//!    the first invalid block
//! 4. Adopt the remaining suffix only if it is strictly longer than the local
//!    blocks it would displace, then roll the ledger back to the ancestor and
//!    forward along the new branch
//!
//! Announcing peers are untrusted. Nothing is modified until a candidate has
//! been fully validated and chosen, and the adoption step itself cannot fail
//! halfway.

use crate::block::{connect_block, disconnect_block};
use crate::chain::ChainStore;
use crate::constants::GENESIS_BLOCK_PREV;
use crate::error::{LedgerError, Result};
use crate::ledger::LedgerState;
use crate::types::*;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

/// Read-only view of a peer's chain.
///
/// Implemented by [`crate::node::Node`]; tests implement it to impersonate
/// lagging or hostile peers.
pub trait BlockSource {
    /// Block with the given hash, or [`LedgerError::BlockNotFound`]
    fn get_block(&self, hash: &BlockHash) -> Result<Block>;

    /// Tip of the peer's chain, `GENESIS_BLOCK_PREV` when it has no blocks
    fn get_latest_hash(&self) -> BlockHash;

    /// Pending transactions of the peer
    fn get_mempool(&self) -> Vec<Transaction> {
        Vec::new()
    }

    /// Identity of the peer when it is a connected node, used to avoid
    /// echoing an announcement back to its source
    fn peer_id(&self) -> Option<PublicKey> {
        None
    }
}

/// A block as fetched from a peer, together with the hash it was requested by
#[derive(Debug, Clone)]
pub struct CandidateBlock {
    pub hash: BlockHash,
    pub block: Block,
}

/// Unknown blocks pulled from a peer, oldest first
#[derive(Debug, Clone)]
pub struct FetchedSuffix {
    /// Locally known block the suffix builds on
    pub fork_point: BlockHash,
    pub blocks: Vec<CandidateBlock>,
}

/// Outcome of comparing a candidate branch with the local chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForkDecision {
    Adopt {
        fork_point: BlockHash,
        blocks: Vec<Block>,
    },
    Reject(String),
}

/// FetchUnknownSuffix: ℍ × Peer → ℬ*
///
/// Starting from `tip`, request blocks from `source` and follow their
/// `prev_hash` until `is_known` accepts a hash or the genesis sentinel is
/// reached. Any failure of the source aborts the whole fetch.
pub fn fetch_unknown_suffix<F>(
    tip: BlockHash,
    is_known: F,
    source: &dyn BlockSource,
    max_depth: usize,
) -> Result<FetchedSuffix>
where
    F: Fn(&BlockHash) -> bool,
{
    let mut blocks = VecDeque::new();
    let mut visited = HashSet::new();
    let mut cursor = tip;

    while cursor != GENESIS_BLOCK_PREV && !is_known(&cursor) {
        if !visited.insert(cursor) {
            return Err(LedgerError::FetchAborted(format!(
                "Peer chain loops back to {}",
                cursor
            )));
        }
        if blocks.len() >= max_depth {
            return Err(LedgerError::FetchAborted(format!(
                "Unknown suffix deeper than {} blocks",
                max_depth
            )));
        }

        let block = source.get_block(&cursor)?;
        let prev_hash = block.prev_hash;
        blocks.push_front(CandidateBlock { hash: cursor, block });
        cursor = prev_hash;
    }

    Ok(FetchedSuffix {
        fork_point: cursor,
        blocks: Vec::from(blocks),
    })
}

/// The block a fetched suffix forks from, provided it is still on the chain
pub fn find_common_ancestor(chain: &ChainStore, suffix: &FetchedSuffix) -> Result<BlockHash> {
    if chain.contains(&suffix.fork_point) {
        Ok(suffix.fork_point)
    } else {
        Err(LedgerError::BlockNotFound(suffix.fork_point))
    }
}

/// UTXO set as it stood right after `fork_point`, derived from the current
/// set by disconnecting every local block above it, tip first
pub fn utxo_at_fork_point(chain: &ChainStore, utxo_set: &UtxoSet, fork_point: &BlockHash) -> Result<UtxoSet> {
    let displaced = chain.suffix_after(fork_point)?;
    let resolve = |id: &TxId| chain.find_transaction(id).cloned();

    Ok(displaced
        .iter()
        .rev()
        .fold(utxo_set.clone(), |utxo, block| disconnect_block(block, utxo, &resolve)))
}

/// ValidateSuffix: ℬ* × 𝒰𝒮 → ℬ*
///
/// Connect the candidate blocks one after another on a running UTXO
/// snapshot and return the longest valid prefix. A block is also invalid if
/// it repeats a transaction for which `is_confirmed` holds or one already
/// seen earlier in the suffix, spent or not.
pub fn validate_suffix<F>(
    candidates: Vec<CandidateBlock>,
    mut utxo_set: UtxoSet,
    block_size: usize,
    is_confirmed: F,
) -> Vec<Block>
where
    F: Fn(&TxId) -> bool,
{
    let mut valid = Vec::with_capacity(candidates.len());
    let mut seen = HashSet::new();

    for candidate in candidates {
        let repeated = candidate
            .block
            .transactions
            .iter()
            .map(|tx| tx.id())
            .find(|id| is_confirmed(id) || seen.contains(id));
        if let Some(id) = repeated {
            warn!(block = %candidate.hash, tx = %id, "discarding block repeating a confirmed transaction");
            break;
        }

        let (result, next) = connect_block(&candidate.block, &candidate.hash, utxo_set, block_size);
        if let ValidationResult::Invalid(reason) = result {
            warn!(block = %candidate.hash, %reason, "discarding invalid block and its descendants");
            break;
        }
        utxo_set = next;
        seen.extend(candidate.block.transactions.iter().map(|tx| tx.id()));
        valid.push(candidate.block);
    }

    valid
}

/// Longest-chain rule. Equal length keeps the chain seen first.
pub fn should_reorganize(candidate_len: usize, local_len: usize) -> bool {
    candidate_len > local_len
}

/// Decide whether a fetched suffix replaces the local blocks above its
/// fork point. Reads chain and ledger only.
pub fn evaluate_candidate(
    chain: &ChainStore,
    ledger: &LedgerState,
    suffix: FetchedSuffix,
    block_size: usize,
) -> Result<ForkDecision> {
    let fork_point = find_common_ancestor(chain, &suffix)?;
    let local_len = chain.ancestor_walk(chain.latest_hash(), Some(fork_point)).count();
    let kept_len = chain.height() - local_len;

    if !should_reorganize(suffix.blocks.len(), local_len) {
        return Ok(ForkDecision::Reject(format!(
            "Candidate of {} blocks does not beat {} local blocks",
            suffix.blocks.len(),
            local_len
        )));
    }

    let snapshot = utxo_at_fork_point(chain, ledger.utxo_set(), &fork_point)?;
    let blocks = validate_suffix(suffix.blocks, snapshot, block_size, |id| chain.confirms_before(id, kept_len));

    if !should_reorganize(blocks.len(), local_len) {
        return Ok(ForkDecision::Reject(format!(
            "Only {} valid blocks remain against {} local blocks",
            blocks.len(),
            local_len
        )));
    }

    Ok(ForkDecision::Adopt { fork_point, blocks })
}

/// Reorganization: switch to `blocks` built on `fork_point`.
///
/// 1. Roll the ledger back through every local block above the fork point, tip first
/// 2. Replace the chain suffix
/// 3. Roll the ledger forward through the new blocks
/// 4. Drop pending transactions that can no longer execute
///
/// Preconditions are checked before anything is modified.
pub fn reorganize_chain(
    chain: &mut ChainStore,
    ledger: &mut LedgerState,
    fork_point: BlockHash,
    blocks: Vec<Block>,
) -> Result<ReorganizationResult> {
    if !chain.contains(&fork_point) {
        return Err(LedgerError::BlockNotFound(fork_point));
    }
    let mut expected_prev = fork_point;
    for block in &blocks {
        if block.prev_hash != expected_prev {
            return Err(LedgerError::BlockValidation(format!(
                "Branch block extends {} instead of {}",
                block.prev_hash, expected_prev
            )));
        }
        expected_prev = block.hash();
    }
    let new_tip = expected_prev;

    // 1. Roll back
    let displaced = chain.suffix_after(&fork_point)?;
    for block in displaced.iter().rev() {
        ledger.rollback(&block.transactions, |id| chain.find_transaction(id).cloned());
    }

    // 2. Swap the suffix
    let disconnected_blocks = chain.replace_suffix(&fork_point, blocks.clone())?;

    // 3. Roll forward
    for block in &blocks {
        ledger.confirm(&block.transactions);
    }

    // 4. Reconcile the mempool
    let pruned = ledger.prune_mempool();
    debug!(%fork_point, pruned, "mempool reconciled after reorganization");

    Ok(ReorganizationResult {
        common_ancestor: fork_point,
        new_tip,
        new_height: chain.height(),
        reorganization_depth: disconnected_blocks.len(),
        disconnected_blocks,
        connected_blocks: blocks,
    })
}

// ============================================================================
// TYPES
// ============================================================================

/// Result of chain reorganization
#[derive(Debug, Clone)]
pub struct ReorganizationResult {
    pub common_ancestor: BlockHash,
    pub new_tip: BlockHash,
    pub new_height: usize,
    pub disconnected_blocks: Vec<Block>,
    pub connected_blocks: Vec<Block>,
    pub reorganization_depth: usize,
}
