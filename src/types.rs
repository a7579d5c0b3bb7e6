//! Core ledger types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub use secp256k1::{PublicKey, SecretKey as PrivateKey};

/// Hash type: 256-bit hash
pub type Hash = [u8; 32];

/// Byte string type
pub type ByteString = Vec<u8>;

/// Transaction identifier: SHA-256 of the transaction contents
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(pub Hash);

/// Block identifier: SHA-256 of the contained transaction ids and the parent hash
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockHash(pub Hash);

macro_rules! impl_hex_display {
    ($name:ident) => {
        impl $name {
            pub fn as_bytes(&self) -> &Hash {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &hex::encode(self.0)[..16])
            }
        }
    };
}

impl_hex_display!(TxId);
impl_hex_display!(BlockHash);

/// Signature bytes. Holds a compact ECDSA signature for spends and random
/// filler for coinbase transactions.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(pub ByteString);

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(&self.0))
    }
}

/// Transaction moving exactly one coin to `output`.
///
/// `input` is the id of the transaction whose coin is spent; `None` marks a
/// coinbase transaction that creates a new coin. Fields are public for
/// inspection only: changing them after construction produces a different
/// transaction and invalidates its signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub output: PublicKey,
    pub input: Option<TxId>,
    pub signature: Signature,
}

/// Block: ordered transactions on top of `prev_hash`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub prev_hash: BlockHash,
    pub transactions: Vec<Transaction>,
}

/// UTXO Set: unspent transaction id → transaction carrying the coin
pub type UtxoSet = HashMap<TxId, Transaction>;

/// Validation result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    Invalid(String),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }
}

/// State of a coin owned by the local node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    /// Free to be spent by a new transaction
    Spendable,
    /// Already spent by a transaction waiting in the mempool
    Frozen,
}
