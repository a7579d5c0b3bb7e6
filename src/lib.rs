//! # Peer-Ledger
//!
//! A minimal peer-to-peer cryptocurrency ledger.
//!
//! Every coin is a transaction output; spending a coin consumes the whole
//! output and creates exactly one new one, signed by the key that owns the
//! spent coin. Nodes mine blocks of pending transactions, gossip
//! transactions and block announcements to their peers, and converge on the
//! longest valid chain.
//!
//! ## Architecture
//!
//! The crate is layered bottom-up:
//! - Primitives: [`types`], [`crypto`], [`transaction`], [`block`]
//! - Per-node state: [`chain`] (ordered blocks), [`mempool`] and [`ledger`]
//!   (UTXO set, pending transactions, own coins)
//! - Fork resolution: [`reorganization`] fetches, validates and adopts
//!   competing branches announced by peers
//! - [`node`]: connections, gossip, mining and wallet functions
//!
//! Validation functions return [`ValidationResult`] values; [`LedgerError`]
//! is reserved for lookups that fail and operations that cannot proceed.
//!
//! ## Usage
//!
//! ```rust
//! use peer_ledger::Node;
//!
//! let alice = Node::new();
//! let bob = Node::new();
//! alice.connect(&bob).unwrap();
//!
//! alice.mine_block().unwrap();
//! assert_eq!(alice.get_latest_hash(), bob.get_latest_hash());
//!
//! let tx = alice.create_transaction(&bob.get_address()).unwrap();
//! assert!(bob.get_mempool().contains(&tx));
//!
//! bob.mine_block().unwrap();
//! assert_eq!(alice.get_balance(), 0);
//! assert_eq!(bob.get_balance(), 2);
//! ```

pub mod types;
pub mod constants;
pub mod crypto;
pub mod transaction;
pub mod block;
pub mod chain;
pub mod mempool;
pub mod ledger;
pub mod reorganization;
pub mod config;
pub mod node;
pub mod error;

// Re-export commonly used types
pub use types::*;
pub use constants::*;
pub use error::{LedgerError, Result};
pub use config::NodeConfig;
pub use node::Node;
pub use reorganization::{BlockSource, ReorganizationResult};
pub use mempool::MempoolResult;
