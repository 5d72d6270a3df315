//! # Blockchain
//!
//! Canonical chain ledger: verifies, executes and commits blocks, chooses
//! between competing branches and serves chain reads.
//!
//! ## Import Pipeline
//!
//! ```text
//! insert_chain(blocks)
//!     │ contiguity check
//!     ▼
//! per block: parent + state ─→ verify_header ─→ body roots
//!     │                                            │
//!     ▼                                            ▼
//! execute txs on private WorldState ─→ finalize ─→ gas / receipts / state roots
//!     │
//!     ▼
//! batch 1: header, body, receipts, TD, state nodes
//!     │
//!     ▼
//! fork choice ──side──→ ChainSide
//!     │ reorg
//!     ▼
//! batch 2: canonical mappings, tx lookups, head keys ─→ head swap ─→ events
//! ```
//!
//! ## Invariants
//!
//! | Invariant | Enforcement |
//! |-----------|-------------|
//! | Adjacent canonical blocks are hash-linked | `insert_chain` contiguity check, parent lookup |
//! | Readers never observe partial writes | Atomic batches, head pointer swapped last |
//! | Stored state matches the header | State root recomputed before any write |
//! | Single writer | Insert mutex shared by every write path |
//!
//! ## Fork Choice
//!
//! | Condition | Winner |
//! |-----------|--------|
//! | Higher TD | Heavier branch |
//! | Equal TD, different height | Lower block |
//! | Equal TD and height | External block only if preserved and the head is not |
//!
//! A block is preserved when its author is a configured local address, unless
//! the engine is proof-of-authority.
//!
//! ## Module Structure
//!
//! - `domain/` - world state, genesis, storage schema, errors
//! - `ports/` - `KeyValueStore`, `ExecutionEngine`, `ConsensusEngine`
//! - `adapters/` - in-memory store, `BasicEngine`, `TransferExecutor`
//! - `service/` - `BlockChain`
//! - `chain_maker` - valid test chains (feature `test-utils`)

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod chain_maker;

pub use adapters::{BasicEngine, InMemoryKVStore, TransferExecutor};
pub use config::ChainConfig;
pub use domain::{
    ChainError, ConsensusError, ExecutionError, Genesis, GenesisAccount, InsertError, KvError,
    TxLookup, WorldState,
};
pub use ports::{
    BatchOperation, BlockContext, ConsensusEngine, EngineDescriptor, EngineKind, ExecutionEngine,
    KeyValueStore, ThreadedMiner, TxContext,
};
pub use service::BlockChain;

#[cfg(any(test, feature = "test-utils"))]
pub use chain_maker::{BlockGen, ChainMaker};
