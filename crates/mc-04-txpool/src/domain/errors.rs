//! # Pool Errors
//!
//! Admission failures are returned to the submitter and leave the pool
//! unchanged.

use shared_types::{Hash, SignatureError, U256};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("oversized data: {size} bytes, limit {max}")]
    OversizedData { size: usize, max: usize },

    #[error("exceeds block gas limit: {gas} > {limit}")]
    GasLimit { gas: u64, limit: u64 },

    #[error("invalid sender: {0}")]
    InvalidSignature(#[from] SignatureError),

    /// Below the price floor, below a same-nonce transaction plus the bump, or
    /// not above the cheapest remote transaction of a full pool.
    #[error("transaction underpriced")]
    Underpriced,

    #[error("nonce too low: account at {expected}, transaction has {got}")]
    NonceTooLow { expected: u64, got: u64 },

    #[error("insufficient funds: balance {balance}, cost {cost}")]
    InsufficientFunds { balance: U256, cost: U256 },

    #[error("intrinsic gas too low: needs {needed}, limit {limit}")]
    IntrinsicGas { needed: u64, limit: u64 },

    #[error("already known: {}", hex::encode(.0))]
    AlreadyKnown(Hash),

    #[error("sender reached its limit of {limit} transactions")]
    AccountLimitReached { limit: usize },

    #[error("local transaction capacity {capacity} reached")]
    PoolFull { capacity: usize },
}
