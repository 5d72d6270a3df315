//! # Outbound Ports (Driven Ports)
//!
//! Dependencies the chain requires from the host: storage, transaction
//! execution and consensus rules.

use crate::domain::{ConsensusError, ExecutionError, KvError, WorldState};
use shared_types::{Address, BlockHeader, Hash, Receipt, Transaction, U256};
use std::fmt;
use std::sync::Arc;

// =============================================================================
// STORAGE
// =============================================================================

/// Abstract interface for key-value database operations.
///
/// Production: `RocksDbStore` (node-runtime, `rocksdb` feature)
/// Testing: `InMemoryKVStore`
///
/// Methods take `&self`: the store is shared between the chain and readers,
/// implementations synchronize internally.
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KvError>;

    /// Put a single key-value pair.
    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), KvError>;

    /// Delete a key.
    fn delete(&self, key: &[u8]) -> Result<(), KvError>;

    /// Execute an atomic batch write.
    ///
    /// Either every operation is applied, in order, or none is.
    fn atomic_batch_write(&self, operations: Vec<BatchOperation>) -> Result<(), KvError>;

    /// Check if a key exists.
    fn exists(&self, key: &[u8]) -> Result<bool, KvError>;

    /// Every pair whose key starts with `prefix`, ordered by key.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, KvError>;
}

/// Batch operation for atomic writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl BatchOperation {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Delete { key: key.into() }
    }
}

// =============================================================================
// EXECUTION
// =============================================================================

/// Block-level inputs to transaction execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockContext {
    pub number: u64,
    /// Recipient of transaction fees.
    pub coinbase: Address,
    pub timestamp: u64,
    pub gas_limit: u64,
    pub difficulty: U256,
}

/// Per-transaction inputs to execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxContext {
    /// Position of the transaction in its block.
    pub index: u32,
    pub hash: Hash,
    /// Gas used by the preceding transactions of the block.
    pub gas_used_before: u64,
}

/// Deterministic state transition for one transaction.
pub trait ExecutionEngine: Send + Sync {
    /// Apply `tx` to `state` and return its receipt.
    ///
    /// On error `state` may be partially modified; the caller discards it.
    fn apply_transaction(
        &self,
        block: &BlockContext,
        tx_ctx: &TxContext,
        state: &mut WorldState,
        tx: &Transaction,
    ) -> Result<Receipt, ExecutionError>;
}

// =============================================================================
// CONSENSUS
// =============================================================================

/// Sealing family of a consensus engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    ProofOfWork,
    ProofOfAuthority,
}

/// Optional capability of engines that mine with worker threads.
pub trait ThreadedMiner: Send + Sync {
    /// Set the worker count. Zero lets the engine choose, negative disables mining.
    fn set_threads(&self, threads: i32);

    fn threads(&self) -> i32;
}

/// What an engine is and which optional capabilities it has.
#[derive(Clone)]
pub struct EngineDescriptor {
    pub kind: EngineKind,
    pub threaded: Option<Arc<dyn ThreadedMiner>>,
}

impl fmt::Debug for EngineDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineDescriptor")
            .field("kind", &self.kind)
            .field("threaded", &self.threaded.is_some())
            .finish()
    }
}

/// Header validity and block finalization rules.
pub trait ConsensusEngine: Send + Sync {
    /// Check `header` against its parent.
    fn verify_header(&self, header: &BlockHeader, parent: &BlockHeader)
        -> Result<(), ConsensusError>;

    /// Apply block-level state changes (rewards) after all transactions.
    fn finalize(
        &self,
        header: &BlockHeader,
        state: &mut WorldState,
        uncles: &[BlockHeader],
    ) -> Result<(), ConsensusError>;

    /// The account credited for the block.
    fn author(&self, header: &BlockHeader) -> Result<Address, ConsensusError>;

    fn descriptor(&self) -> EngineDescriptor;
}
