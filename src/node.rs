//! Node: peer connections, gossip, mining and wallet functions
//!
//! A [`Node`] is a cheap handle to shared node state. All mutation of one
//! node's chain and ledger happens behind its mutex, and the mutex is never
//! held while calling into another node: fetching blocks, relaying
//! transactions and announcing tips all run with the lock released, so
//! recursive gossip between nodes cannot deadlock.

use crate::chain::ChainStore;
use crate::config::NodeConfig;
use crate::crypto::generate_keypair;
use crate::error::{LedgerError, Result};
use crate::ledger::LedgerState;
use crate::reorganization::*;
use crate::transaction::sign_transaction;
use crate::types::*;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

/// Handle to a participant of the network.
///
/// Clones refer to the same node. Peers hold each other weakly, so dropping
/// every handle of a node removes it from its peers' connections.
#[derive(Clone)]
pub struct Node {
    address: PublicKey,
    state: Arc<Mutex<NodeState>>,
}

struct NodeState {
    private_key: PrivateKey,
    config: NodeConfig,
    chain: ChainStore,
    ledger: LedgerState,
    peers: HashMap<PublicKey, Weak<Mutex<NodeState>>>,
}

impl NodeState {
    fn peer_nodes(&self) -> Vec<Node> {
        self.peers
            .iter()
            .filter_map(|(address, peer)| {
                peer.upgrade().map(|state| Node {
                    address: *address,
                    state,
                })
            })
            .collect()
    }
}

impl Node {
    /// Node with a fresh key pair, an empty chain and no connections
    pub fn new() -> Self {
        Self::build(NodeConfig::default())
    }

    pub fn with_config(config: NodeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: NodeConfig) -> Self {
        let (private_key, address) = generate_keypair();
        let state = NodeState {
            private_key,
            config,
            chain: ChainStore::new(),
            ledger: LedgerState::new(address),
            peers: HashMap::new(),
        };

        Self {
            address,
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock()
    }

    /// Public key that mining rewards and payments to this node go to
    pub fn get_address(&self) -> PublicKey {
        self.address
    }

    pub fn config(&self) -> NodeConfig {
        self.state().config.clone()
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    /// Connect both ways and let each side learn the other's tip
    pub fn connect(&self, other: &Node) -> Result<()> {
        if Arc::ptr_eq(&self.state, &other.state) || self.address == other.address {
            return Err(LedgerError::InvalidOperation(
                "node can't connect to itself".to_string(),
            ));
        }

        self.state().peers.insert(other.address, Arc::downgrade(&other.state));
        other.state().peers.insert(self.address, Arc::downgrade(&self.state));
        info!(node = %self, peer = %other, "connected");

        other.notify_of_block(self.get_latest_hash(), self);
        self.notify_of_block(other.get_latest_hash(), other);
        Ok(())
    }

    /// Drop the connection in both directions. No-op if not connected.
    pub fn disconnect_from(&self, other: &Node) {
        let removed = self.state().peers.remove(&other.address).is_some();
        other.state().peers.remove(&self.address);
        if removed {
            info!(node = %self, peer = %other, "disconnected");
        }
    }

    pub fn get_connections(&self) -> Vec<Node> {
        self.state().peer_nodes()
    }

    pub fn is_connected_to(&self, other: &Node) -> bool {
        self.state().peers.contains_key(&other.address)
    }

    // ------------------------------------------------------------------
    // Gossip
    // ------------------------------------------------------------------

    /// Validate `transaction` and queue it, relaying it to every peer on
    /// acceptance. Returns false if it was rejected, including when it is
    /// already pending.
    pub fn add_transaction_to_mempool(&self, transaction: Transaction) -> bool {
        let accepted = self.state().ledger.submit(transaction.clone()).is_accepted();
        if accepted {
            self.relay_transaction(&transaction);
        }
        accepted
    }

    fn relay_transaction(&self, transaction: &Transaction) {
        for peer in self.get_connections() {
            trace!(node = %self, peer = %peer, tx = %transaction.id(), "relaying transaction");
            peer.add_transaction_to_mempool(transaction.clone());
        }
    }

    /// Entry point for peers announcing a block.
    ///
    /// Failures caused by the sender (missing blocks, invalid chains) are
    /// logged and otherwise ignored; local state is left as it was.
    pub fn notify_of_block(&self, block_hash: BlockHash, sender: &dyn BlockSource) {
        if let Err(err) = self.handle_announcement(block_hash, sender) {
            warn!(node = %self, block = %block_hash, error = %err, "abandoned block announcement");
        }
    }

    /// Fetch, validate and possibly adopt the chain ending at `tip_hash`.
    ///
    /// Returns the reorganization performed, or `None` when the tip was
    /// already known or the candidate chain did not win. After adopting,
    /// the new tip is announced to every peer except the sender.
    pub fn handle_announcement(
        &self,
        tip_hash: BlockHash,
        sender: &dyn BlockSource,
    ) -> Result<Option<ReorganizationResult>> {
        if self.state().chain.contains(&tip_hash) {
            trace!(node = %self, block = %tip_hash, "announced block already known");
            return Ok(None);
        }

        let max_depth = self.state().config.max_fetch_depth;
        let suffix = fetch_unknown_suffix(tip_hash, |hash| self.state().chain.contains(hash), sender, max_depth)?;

        let (result, peers) = {
            let mut guard = self.state();
            let state = &mut *guard;

            match evaluate_candidate(&state.chain, &state.ledger, suffix, state.config.block_size)? {
                ForkDecision::Reject(reason) => {
                    debug!(node = %self, block = %tip_hash, %reason, "candidate chain rejected");
                    return Ok(None);
                }
                ForkDecision::Adopt { fork_point, blocks } => {
                    let result = reorganize_chain(&mut state.chain, &mut state.ledger, fork_point, blocks)?;
                    (result, state.peer_nodes())
                }
            }
        };

        info!(
            node = %self,
            fork_point = %result.common_ancestor,
            depth = result.reorganization_depth,
            connected = result.connected_blocks.len(),
            tip = %result.new_tip,
            "adopted longer chain"
        );

        let source = sender.peer_id();
        for peer in peers.into_iter().filter(|peer| Some(peer.address) != source) {
            peer.notify_of_block(result.new_tip, self);
        }

        Ok(Some(result))
    }

    // ------------------------------------------------------------------
    // Mining
    // ------------------------------------------------------------------

    /// Mine one block from the oldest pending transactions plus a coinbase
    /// paying this node, and announce it to every peer.
    pub fn mine_block(&self) -> Result<BlockHash> {
        let (hash, peers) = {
            let mut guard = self.state();
            let state = &mut *guard;

            let mut transactions = vec![Transaction::coinbase(self.address)];
            transactions.extend(state.ledger.mempool().take(state.config.block_size - 1));
            let block = Block::new(state.chain.latest_hash(), transactions);

            let hash = state.chain.append(block.clone())?;
            state.ledger.confirm(&block.transactions);
            info!(
                node = %self,
                block = %hash,
                height = state.chain.height(),
                transactions = block.transactions.len(),
                "mined block"
            );
            (hash, state.peer_nodes())
        };

        for peer in peers {
            peer.notify_of_block(hash, self);
        }
        Ok(hash)
    }

    // ------------------------------------------------------------------
    // Wallet
    // ------------------------------------------------------------------

    /// Spend one of this node's coins to `target`.
    ///
    /// The coin stays frozen until the transaction confirms or the mempool
    /// is cleared. Returns `None` if every owned coin is already being spent.
    pub fn create_transaction(&self, target: &PublicKey) -> Option<Transaction> {
        let transaction = {
            let mut guard = self.state();
            let state = &mut *guard;

            let coin = state.ledger.next_spendable()?;
            state.ledger.freeze(&coin);
            let transaction = sign_transaction(*target, coin, &state.private_key);

            if !state.ledger.submit(transaction.clone()).is_accepted() {
                state.ledger.unfreeze(&coin);
                return None;
            }
            transaction
        };

        self.relay_transaction(&transaction);
        Some(transaction)
    }

    /// Forget every pending transaction and unfreeze the coins they spent
    pub fn clear_mempool(&self) {
        self.state().ledger.clear_mempool();
    }

    /// Coins owned on the adopted chain. Coins spent by pending
    /// transactions still count.
    pub fn get_balance(&self) -> usize {
        self.state().ledger.balance()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn get_block(&self, block_hash: &BlockHash) -> Result<Block> {
        self.state().chain.get(block_hash).cloned()
    }

    /// Block at the tip of the adopted chain, [`LedgerError::EmptyChain`]
    /// before the first block
    pub fn get_latest_block(&self) -> Result<Block> {
        self.state().chain.tip().cloned()
    }

    /// Tip of the adopted chain, `GENESIS_BLOCK_PREV` before the first block
    pub fn get_latest_hash(&self) -> BlockHash {
        self.state().chain.latest_hash()
    }

    pub fn get_mempool(&self) -> Vec<Transaction> {
        self.state().ledger.mempool().transactions().to_vec()
    }

    pub fn get_utxo(&self) -> Vec<Transaction> {
        self.state().ledger.utxo_set().values().cloned().collect()
    }

    pub fn utxo_set(&self) -> UtxoSet {
        self.state().ledger.utxo_set().clone()
    }

    pub fn output_state(&self, coin: &TxId) -> Option<OutputState> {
        self.state().ledger.output_state(coin)
    }

    pub fn chain_height(&self) -> usize {
        self.state().chain.height()
    }

    /// Hashes of the adopted chain, oldest first
    pub fn chain_hashes(&self) -> Vec<BlockHash> {
        self.state().chain.hashes().to_vec()
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockSource for Node {
    fn get_block(&self, hash: &BlockHash) -> Result<Block> {
        Node::get_block(self, hash)
    }

    fn get_latest_hash(&self) -> BlockHash {
        Node::get_latest_hash(self)
    }

    fn get_mempool(&self) -> Vec<Transaction> {
        Node::get_mempool(self)
    }

    fn peer_id(&self) -> Option<PublicKey> {
        Some(self.address)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = self.address.serialize();
        write!(f, "{}", hex::encode(&key[1..9]))
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self)
    }
}
