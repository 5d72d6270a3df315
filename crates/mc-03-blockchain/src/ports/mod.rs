//! # Ports Layer
//!
//! The chain is driven by its own API (`BlockChain`) and drives three ports:
//! storage, execution and consensus.

pub mod outbound;

pub use outbound::{
    BatchOperation, BlockContext, ConsensusEngine, EngineDescriptor, EngineKind, ExecutionEngine,
    KeyValueStore, ThreadedMiner, TxContext,
};
