//! # Shared Types Crate
//!
//! Chain data model shared across the workspace.
//!
//! ## Modules
//!
//! | Module | Contents |
//! |--------|----------|
//! | `entities` | `BlockHeader`, `Block`, `BlockBody`, `Transaction`, `Receipt`, `Log`, `Account` |
//! | `hashing` | Keccak-256 and the binary merkle root used for body commitments |
//! | `trie` | Two-level state commitment and its node codec |
//! | `protocol` | Peer wire messages and capability negotiation types |
//! | `ports` | `SenderRecovery`, the signature-recovery seam |
//!
//! ## Design Principles
//!
//! - **Content identity**: a header's hash is Keccak-256 over its canonical
//!   field encoding; blocks are identified by their header hash.
//! - **Immutability**: entities are plain values; nothing here holds locks.

pub mod entities;
pub mod errors;
pub mod hashing;
pub mod ports;
pub mod protocol;
pub mod trie;

pub use entities::*;
pub use errors::*;
pub use hashing::{keccak256, merkle_root, EMPTY_ROOT};
pub use ports::SenderRecovery;
