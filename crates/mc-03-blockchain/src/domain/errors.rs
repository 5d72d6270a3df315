//! # Blockchain Errors
//!
//! | Error | Raised by |
//! |-------|-----------|
//! | `KvError` | Storage adapters |
//! | `ConsensusError` | Header verification and finalization |
//! | `ExecutionError` | Transaction execution |
//! | `ChainError` | Chain reads and writes |
//! | `InsertError` | Batch imports, with the index of the failing block |

use shared_types::{Address, Hash, SignatureError, U256};
use thiserror::Error;

/// Key-value store failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KvError {
    #[error("KV store I/O error: {0}")]
    Io(String),

    #[error("KV store corruption: {0}")]
    Corruption(String),
}

/// Header rule violations and finalization failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsensusError {
    #[error("block number {got} does not follow parent {parent}")]
    InvalidNumber { parent: u64, got: u64 },

    #[error("timestamp {got} not after parent timestamp {parent}")]
    InvalidTimestamp { parent: u64, got: u64 },

    #[error("gas used {used} exceeds gas limit {limit}")]
    GasUsedExceedsLimit { used: u64, limit: u64 },

    #[error("gas limit {got} out of bounds for parent limit {parent}")]
    InvalidGasLimit { parent: u64, got: u64 },

    #[error("extra data of {len} bytes exceeds {max}")]
    ExtraDataTooLong { len: usize, max: usize },

    #[error("zero difficulty")]
    ZeroDifficulty,

    #[error("balance overflow while paying rewards")]
    RewardOverflow,
}

/// Transaction execution failures. Any of these invalidates the block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("invalid signature: {0}")]
    InvalidSignature(#[from] SignatureError),

    #[error("nonce mismatch: account at {expected}, transaction has {got}")]
    NonceMismatch { expected: u64, got: u64 },

    #[error("insufficient funds: balance {balance}, cost {cost}")]
    InsufficientFunds { balance: U256, cost: U256 },

    #[error("intrinsic gas {needed} exceeds gas limit {limit}")]
    IntrinsicGas { needed: u64, limit: u64 },

    #[error("block gas limit reached")]
    GasLimitReached,

    #[error("balance overflow at {}", hex::encode(.0))]
    BalanceOverflow(Address),
}

/// Chain read and write failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("unknown ancestor {}", hex::encode(.0))]
    UnknownAncestor(Hash),

    #[error("unknown block {}", hex::encode(.0))]
    UnknownBlock(Hash),

    #[error("no canonical block at height {0}")]
    MissingCanonical(u64),

    #[error("missing state for root {}", hex::encode(.0))]
    MissingState(Hash),

    #[error("non-contiguous insert: block {number} does not extend block {prev}")]
    NonContiguousInsert { prev: u64, number: u64 },

    #[error("invalid header: {0}")]
    InvalidHeader(#[from] ConsensusError),

    #[error("body does not match header {0}")]
    BodyMismatch(&'static str),

    #[error("transaction {index} failed: {source}")]
    Execution {
        index: usize,
        #[source]
        source: ExecutionError,
    },

    #[error("gas used mismatch: header {expected}, computed {got}")]
    GasUsedMismatch { expected: u64, got: u64 },

    #[error("receipts root mismatch: header {}, computed {}", hex::encode(.expected), hex::encode(.got))]
    ReceiptsRootMismatch { expected: Hash, got: Hash },

    #[error("state root mismatch: header {}, computed {}", hex::encode(.expected), hex::encode(.got))]
    StateRootMismatch { expected: Hash, got: Hash },

    #[error("{blocks} blocks but {receipts} receipt lists")]
    ReceiptCountMismatch { blocks: usize, receipts: usize },

    #[error("genesis mismatch: stored {}, configured {}", hex::encode(.stored), hex::encode(.configured))]
    GenesisMismatch { stored: Hash, configured: Hash },

    #[error("storage error: {0}")]
    Storage(#[from] KvError),

    #[error("record codec error: {0}")]
    Codec(String),
}

/// A failed batch import.
///
/// `index` is the position of the failing block in the batch, which is also
/// the number of blocks that were processed before it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("insert failed at index {index}: {source}")]
pub struct InsertError {
    pub index: usize,
    #[source]
    pub source: ChainError,
}

impl InsertError {
    pub fn new(index: usize, source: impl Into<ChainError>) -> Self {
        Self {
            index,
            source: source.into(),
        }
    }
}
