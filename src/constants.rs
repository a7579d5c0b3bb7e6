//! Ledger constants

use crate::types::BlockHash;

/// Maximum number of transactions in a block, coinbase included
pub const BLOCK_SIZE: usize = 10;

/// `prev_hash` of the first block of every chain
pub const GENESIS_BLOCK_PREV: BlockHash = BlockHash([0u8; 32]);

/// Number of random bytes carried in place of a signature by a coinbase transaction
pub const COINBASE_SIGNATURE_SIZE: usize = 48;

/// Maximum number of unknown blocks pulled from a peer for a single announcement
pub const MAX_FETCH_DEPTH: usize = 100_000;

/// Size of a compressed secp256k1 public key
pub const PUBLIC_KEY_SIZE: usize = 33;

/// Size of a compact ECDSA signature
pub const SIGNATURE_SIZE: usize = 64;
