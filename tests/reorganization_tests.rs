//! Tests for fork resolution: competing branches and untrusted peers

use peer_ledger::crypto::generate_keypair;
use peer_ledger::transaction::sign_transaction;
use peer_ledger::*;
use std::collections::HashMap;

/// Peer serving whatever blocks it was handed, keyed by the hash it claims
struct ScriptedPeer {
    blocks: HashMap<BlockHash, Block>,
    tip: BlockHash,
}

impl ScriptedPeer {
    fn serving(chain: &[Block]) -> Self {
        let blocks: HashMap<BlockHash, Block> = chain.iter().map(|b| (b.hash(), b.clone())).collect();
        let tip = chain.last().map_or(GENESIS_BLOCK_PREV, |b| b.hash());
        Self { blocks, tip }
    }

    /// Replace the block served under `hash` without changing the key
    fn swap(&mut self, hash: &BlockHash, block: Block) {
        self.blocks.insert(*hash, block);
    }

    fn forget(&mut self, hash: &BlockHash) {
        self.blocks.remove(hash);
    }
}

impl BlockSource for ScriptedPeer {
    fn get_block(&self, hash: &BlockHash) -> Result<Block> {
        self.blocks.get(hash).cloned().ok_or(LedgerError::BlockNotFound(*hash))
    }

    fn get_latest_hash(&self) -> BlockHash {
        self.tip
    }
}

/// Chain of coinbase-only blocks on top of `prev`
fn coinbase_chain(prev: BlockHash, length: usize, miner: PublicKey) -> Vec<Block> {
    let mut blocks = Vec::with_capacity(length);
    let mut prev = prev;
    for _ in 0..length {
        let block = Block::new(prev, vec![Transaction::coinbase(miner)]);
        prev = block.hash();
        blocks.push(block);
    }
    blocks
}

fn snapshot(node: &Node) -> (BlockHash, usize, UtxoSet, Vec<Transaction>) {
    (node.get_latest_hash(), node.get_balance(), node.utxo_set(), node.get_mempool())
}

#[test]
fn test_equal_length_branch_is_ignored() {
    let alice = Node::new();
    let bob = Node::new();
    alice.mine_block().unwrap();
    bob.mine_block().unwrap();

    let before = alice.get_latest_hash();
    let result = alice.handle_announcement(bob.get_latest_hash(), &bob).unwrap();
    assert!(result.is_none());
    assert_eq!(alice.get_latest_hash(), before);
}

#[test]
fn test_longer_branch_replaces_local_suffix() {
    let alice = Node::new();
    let bob = Node::new();
    alice.mine_block().unwrap();
    alice.connect(&bob).unwrap();
    alice.disconnect_from(&bob);

    alice.mine_block().unwrap();
    bob.mine_block().unwrap();
    bob.mine_block().unwrap();

    let result = alice
        .handle_announcement(bob.get_latest_hash(), &bob)
        .unwrap()
        .expect("longer branch adopted");
    assert_eq!(result.reorganization_depth, 1);
    assert_eq!(result.connected_blocks.len(), 2);
    assert_eq!(result.new_height, 3);
    assert_eq!(alice.chain_hashes(), bob.chain_hashes());

    // The coinbase of the displaced block is gone
    assert_eq!(alice.get_balance(), 1);
}

#[test]
fn test_reorg_round_trip_leaves_no_artifacts() -> anyhow::Result<()> {
    let alice = Node::new();
    let bob = Node::new();
    let charlie = Node::new();

    for _ in 0..2 {
        alice.mine_block()?;
    }
    alice.connect(&bob)?;
    alice.connect(&charlie)?;
    alice.disconnect_from(&bob);
    alice.disconnect_from(&charlie);

    // Bob's branch pays alice; charlie's branch is longer and does not
    bob.mine_block()?;
    let payment = bob
        .create_transaction(&alice.get_address())
        .expect("bob owns a coin");
    bob.mine_block()?;
    bob.mine_block()?;
    for _ in 0..4 {
        charlie.mine_block()?;
    }

    alice.connect(&bob)?;
    assert_eq!(alice.get_latest_hash(), bob.get_latest_hash());
    assert!(alice.utxo_set().contains_key(&payment.id()));
    assert_eq!(alice.get_balance(), 3);

    alice.disconnect_from(&bob);
    alice.connect(&charlie)?;
    assert_eq!(alice.get_latest_hash(), charlie.get_latest_hash());

    // A node that only ever saw charlie's chain
    let observer = Node::new();
    observer.connect(&charlie)?;

    assert_eq!(alice.utxo_set(), observer.utxo_set());
    assert_eq!(alice.chain_hashes(), observer.chain_hashes());
    assert!(!alice.utxo_set().contains_key(&payment.id()));
    assert!(alice.get_mempool().is_empty());
    assert_eq!(alice.get_balance(), 2);
    Ok(())
}

#[test]
fn test_reorg_readmits_displaced_spend() {
    let alice = Node::new();
    let bob = Node::new();
    alice.mine_block().unwrap();
    alice.connect(&bob).unwrap();
    alice.disconnect_from(&bob);

    // The spend confirms only on alice's side of the split
    let spend = alice.create_transaction(&bob.get_address()).unwrap();
    alice.mine_block().unwrap();
    assert!(alice.get_mempool().is_empty());

    bob.mine_block().unwrap();
    bob.mine_block().unwrap();
    alice.connect(&bob).unwrap();

    assert_eq!(alice.get_latest_hash(), bob.get_latest_hash());
    assert_eq!(alice.get_mempool(), vec![spend.clone()]);
    assert_eq!(alice.output_state(&spend.input.unwrap()), Some(OutputState::Frozen));
    assert_eq!(alice.get_balance(), 1);
}

#[test]
fn test_tampered_block_is_rejected() {
    let victim = Node::new();
    victim.mine_block().unwrap();
    let before = snapshot(&victim);

    let (_, miner) = generate_keypair();
    let chain = coinbase_chain(GENESIS_BLOCK_PREV, 3, miner);
    let mut peer = ScriptedPeer::serving(&chain);

    // Redirect the first coinbase while keeping the advertised hash
    let mut forged = chain[0].clone();
    forged.transactions[0].output = victim.get_address();
    peer.swap(&chain[0].hash(), forged);

    victim.notify_of_block(peer.get_latest_hash(), &peer);
    assert_eq!(snapshot(&victim), before);
}

#[test]
fn test_valid_prefix_of_tampered_branch_is_kept() {
    let victim = Node::new();
    let (_, miner) = generate_keypair();
    let chain = coinbase_chain(GENESIS_BLOCK_PREV, 3, miner);
    let mut peer = ScriptedPeer::serving(&chain);

    let mut forged = chain[1].clone();
    forged.transactions.push(Transaction::coinbase(miner));
    peer.swap(&chain[1].hash(), forged);

    let result = victim.handle_announcement(peer.get_latest_hash(), &peer).unwrap();
    assert!(result.is_some());
    assert_eq!(victim.chain_hashes(), vec![chain[0].hash()]);
}

#[test]
fn test_missing_block_aborts_announcement() {
    let victim = Node::new();
    victim.mine_block().unwrap();
    let before = snapshot(&victim);

    let (_, miner) = generate_keypair();
    let chain = coinbase_chain(GENESIS_BLOCK_PREV, 4, miner);
    let mut peer = ScriptedPeer::serving(&chain);
    peer.forget(&chain[1].hash());

    let err = victim.handle_announcement(peer.get_latest_hash(), &peer).unwrap_err();
    assert!(matches!(err, LedgerError::BlockNotFound(_)));

    victim.notify_of_block(peer.get_latest_hash(), &peer);
    assert_eq!(snapshot(&victim), before);
}

#[test]
fn test_forged_signature_truncates_branch() {
    let victim = Node::new();
    victim.mine_block().unwrap();
    victim.mine_block().unwrap();
    let before = snapshot(&victim);

    let (_, miner) = generate_keypair();
    let (thief_key, _) = generate_keypair();
    let first = Block::with_genesis_parent(vec![Transaction::coinbase(miner)]);
    let theft = sign_transaction(victim.get_address(), first.transactions[0].id(), &thief_key);
    let second = Block::new(first.hash(), vec![Transaction::coinbase(miner), theft]);
    let mut chain = vec![first, second];
    chain.extend(coinbase_chain(chain[1].hash(), 1, miner));
    let peer = ScriptedPeer::serving(&chain);

    // Only one valid block remains, which does not beat two local blocks
    let result = victim.handle_announcement(peer.get_latest_hash(), &peer).unwrap();
    assert!(result.is_none());
    assert_eq!(snapshot(&victim), before);
}

#[test]
fn test_oversized_block_rejected() {
    let victim = Node::new();
    let (_, miner) = generate_keypair();

    let first = Block::with_genesis_parent(vec![Transaction::coinbase(miner)]);
    let mut crowded = vec![Transaction::coinbase(miner)];
    let (sender_key, sender) = generate_keypair();
    let coins: Vec<Transaction> = (0..BLOCK_SIZE).map(|_| Transaction::coinbase(sender)).collect();
    crowded.extend(coins.iter().map(|coin| sign_transaction(miner, coin.id(), &sender_key)));
    let second = Block::new(first.hash(), crowded);
    let peer = ScriptedPeer::serving(&[first.clone(), second]);

    victim.notify_of_block(peer.get_latest_hash(), &peer);
    assert_eq!(victim.chain_hashes(), vec![first.hash()]);
}

#[test]
fn test_double_spend_within_branch_rejected() {
    let victim = Node::new();
    let (owner_key, owner) = generate_keypair();
    let (_, payee) = generate_keypair();

    let first = Block::with_genesis_parent(vec![Transaction::coinbase(owner)]);
    let coin = first.transactions[0].id();
    let second = Block::new(
        first.hash(),
        vec![Transaction::coinbase(owner), sign_transaction(payee, coin, &owner_key)],
    );
    let third = Block::new(
        second.hash(),
        vec![Transaction::coinbase(owner), sign_transaction(owner, coin, &owner_key)],
    );
    let peer = ScriptedPeer::serving(&[first.clone(), second.clone(), third]);

    victim.notify_of_block(peer.get_latest_hash(), &peer);
    assert_eq!(victim.chain_hashes(), vec![first.hash(), second.hash()]);
}

#[test]
fn test_endless_peer_bounded_by_fetch_depth() {
    let config = NodeConfig {
        max_fetch_depth: 3,
        ..NodeConfig::default()
    };
    let victim = Node::with_config(config).unwrap();
    let (_, miner) = generate_keypair();
    let peer = ScriptedPeer::serving(&coinbase_chain(GENESIS_BLOCK_PREV, 5, miner));

    let err = victim.handle_announcement(peer.get_latest_hash(), &peer).unwrap_err();
    assert!(matches!(err, LedgerError::FetchAborted(_)));
    assert_eq!(victim.get_latest_hash(), GENESIS_BLOCK_PREV);
}

#[test]
fn test_known_tip_is_noop() {
    let alice = Node::new();
    let hash = alice.mine_block().unwrap();
    let peer = ScriptedPeer::serving(&[]);
    assert!(peer.get_mempool().is_empty());

    assert!(alice.handle_announcement(hash, &peer).unwrap().is_none());
    assert!(alice.handle_announcement(GENESIS_BLOCK_PREV, &peer).unwrap().is_none());
}

#[test]
fn test_replayed_coinbase_rejected_and_later_reorg_keeps_coin() {
    let victim = Node::new();
    let (_, miner) = generate_keypair();

    // Second block confirms the first block's coinbase again
    let first = Block::with_genesis_parent(vec![Transaction::coinbase(miner)]);
    let coin = first.transactions[0].id();
    let replay = Block::new(first.hash(), first.transactions.clone());
    let peer = ScriptedPeer::serving(&[first.clone(), replay]);

    victim.notify_of_block(peer.get_latest_hash(), &peer);
    assert_eq!(victim.chain_hashes(), vec![first.hash()]);

    let mut honest = vec![first.clone()];
    honest.extend(coinbase_chain(first.hash(), 2, miner));
    let peer = ScriptedPeer::serving(&honest);
    victim.notify_of_block(peer.get_latest_hash(), &peer);

    let observer = Node::new();
    observer.notify_of_block(peer.get_latest_hash(), &peer);

    assert_eq!(victim.chain_hashes(), observer.chain_hashes());
    assert_eq!(victim.utxo_set(), observer.utxo_set());
    assert!(victim.utxo_set().contains_key(&coin));
    assert_eq!(victim.utxo_set().len(), 3);
}

#[test]
fn test_replayed_spent_coinbase_rejected() {
    let victim = Node::new();
    let (owner_key, owner) = generate_keypair();
    let (_, payee) = generate_keypair();

    let first = Block::with_genesis_parent(vec![Transaction::coinbase(owner)]);
    let coin = first.transactions[0].clone();
    let second = Block::new(
        first.hash(),
        vec![Transaction::coinbase(owner), sign_transaction(payee, coin.id(), &owner_key)],
    );
    let peer = ScriptedPeer::serving(&[first.clone(), second.clone()]);
    victim.notify_of_block(peer.get_latest_hash(), &peer);
    assert_eq!(victim.chain_height(), 2);

    // The spent coin reappears on top of the known chain
    let third = Block::new(second.hash(), vec![coin.clone()]);
    let fourth = Block::new(third.hash(), vec![Transaction::coinbase(owner)]);
    let peer = ScriptedPeer::serving(&[first, second.clone(), third, fourth]);
    let before = snapshot(&victim);

    victim.notify_of_block(peer.get_latest_hash(), &peer);
    assert_eq!(snapshot(&victim), before);
    assert_eq!(victim.get_latest_hash(), second.hash());
    assert!(!victim.utxo_set().contains_key(&coin.id()));
}

#[test]
fn test_reorg_evicts_spend_conflicting_with_new_branch() -> anyhow::Result<()> {
    let alice = Node::new();
    let bob = Node::new();
    let charlie = Node::new();
    let (_, miner) = generate_keypair();

    let shared = alice.mine_block()?;
    let shared_block = alice.get_block(&shared)?;
    let coin = shared_block.transactions[0].id();

    // Two spends of the same coin, both signed by alice
    let to_charlie = alice.create_transaction(&charlie.get_address()).expect("alice owns a coin");
    alice.clear_mempool();
    let to_bob = alice.create_transaction(&bob.get_address()).expect("coin unfrozen");
    assert_eq!(to_charlie.input, to_bob.input);

    // Alice confirms the spend to bob on her own branch
    alice.mine_block()?;
    assert!(alice.get_mempool().is_empty());

    // A longer branch confirms the spend to charlie instead
    let second = Block::new(shared, vec![Transaction::coinbase(miner), to_charlie.clone()]);
    let mut branch = vec![shared_block, second.clone()];
    branch.extend(coinbase_chain(second.hash(), 1, miner));
    let peer = ScriptedPeer::serving(&branch);

    let result = alice
        .handle_announcement(peer.get_latest_hash(), &peer)?
        .expect("longer branch adopted");
    assert_eq!(result.reorganization_depth, 1);

    // The displaced spend came back only to be evicted by the confirmed one
    assert!(alice.get_mempool().is_empty());
    assert_eq!(alice.output_state(&coin), None);
    assert_eq!(alice.get_balance(), 0);
    assert!(alice.create_transaction(&bob.get_address()).is_none());

    let observer = Node::new();
    observer.notify_of_block(peer.get_latest_hash(), &peer);
    assert_eq!(alice.utxo_set(), observer.utxo_set());
    assert!(alice.utxo_set().contains_key(&to_charlie.id()));
    assert!(!alice.utxo_set().contains_key(&to_bob.id()));
    Ok(())
}
