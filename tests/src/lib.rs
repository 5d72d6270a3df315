//! # Meridian-Chain Test Suite
//!
//! Scenarios that span several crates: nodes joined over in-memory pipes or
//! TCP, scripted serving peers, and the full runtime.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs          # Funded account, transfers, chain builders
//! └── integration/
//!     ├── chain_sync.rs    # Relay sync, linkage, replay, fast-sync gate
//!     ├── fork_choice.rs   # Reorg onto a heavier remote branch
//!     ├── peer_faults.rs   # Invalid headers, corrupt bodies
//!     ├── tx_gossip.rs     # Pool admission rules across two nodes
//!     └── runtime.rs       # Miner gate around a real sync
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p mc-tests
//! cargo test -p mc-tests integration::peer_faults
//! ```

pub mod fixtures;
pub mod integration;
