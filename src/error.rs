//! Error types for ledger operations

use crate::types::BlockHash;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Block not found: {0}")]
    BlockNotFound(BlockHash),

    #[error("The chain does not contain any blocks")]
    EmptyChain,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Block validation failed: {0}")]
    BlockValidation(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Block fetch aborted: {0}")]
    FetchAborted(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
