//! Per-node configuration

use crate::constants::*;
use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};

/// Tunables of a node. Missing fields take their defaults when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Maximum transactions per block, coinbase included
    pub block_size: usize,
    /// Maximum unknown blocks fetched for one announcement
    pub max_fetch_depth: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            block_size: BLOCK_SIZE,
            max_fetch_depth: MAX_FETCH_DEPTH,
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(LedgerError::InvalidOperation(
                "Block size must leave room for the coinbase transaction".to_string(),
            ));
        }
        if self.max_fetch_depth == 0 {
            return Err(LedgerError::InvalidOperation(
                "Fetch depth must allow at least one block".to_string(),
            ));
        }
        Ok(())
    }
}
