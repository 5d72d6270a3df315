//! # Adapters Layer
//!
//! Reference implementations of the outbound ports.
//!
//! | Adapter | Port |
//! |---------|------|
//! | `InMemoryKVStore` | `KeyValueStore` |
//! | `BasicEngine` | `ConsensusEngine` |
//! | `TransferExecutor` | `ExecutionEngine` |

pub mod basic_engine;
pub mod memory_store;
pub mod transfer_executor;

pub use basic_engine::{
    BasicEngine, MinerThreads, DEFAULT_BLOCK_REWARD, GAS_LIMIT_BOUND_DIVISOR, MAX_EXTRA_DATA_SIZE,
    MIN_GAS_LIMIT,
};
pub use memory_store::InMemoryKVStore;
pub use transfer_executor::{created_address, TransferExecutor};
