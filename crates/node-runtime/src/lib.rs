//! # Meridian-Chain Node Runtime
//!
//! Configuration, component wiring and the long-running tasks of a node.
//!
//! ```text
//!   NodeConfig ──→ NodeRuntime::new
//!                    store ─→ BlockChain ─→ TxPool, Downloader, Handler
//!
//!   NodeRuntime::start
//!     ├─ ChainSyncer          (Handler::run_syncer)
//!     ├─ tx broadcast         (NewPendingTransactions ─→ peers)
//!     ├─ pool reset           (ChainHead ─→ TxPool)
//!     ├─ miner gate           (Sync* ─→ MinerGate)
//!     ├─ metrics recorder     (all events ─→ Prometheus)
//!     ├─ TCP listener         (accept ─→ Handler::run_peer)
//!     └─ bootnode dialers     (connect ─→ Handler::run_peer, redial)
//! ```
//!
//! ## Modules
//!
//! - `config` - [`NodeConfig`], file and environment layering, validation
//! - `miner` - [`MinerGate`], pauses mining during sync
//! - `runtime` - [`NodeRuntime`], builds and owns everything
//! - `storage` - RocksDB store (feature `rocksdb`)
//! - `wiring/` - network and metrics tasks

pub mod config;
pub mod miner;
pub mod runtime;
#[cfg(feature = "rocksdb")]
pub mod storage;
pub mod wiring;

pub use config::{ConfigError, NodeConfig};
pub use miner::MinerGate;
pub use runtime::{NodeRuntime, RuntimeError};
