//! # Shared Crypto
//!
//! ## Components
//!
//! | Module | Algorithm | Use Case |
//! |--------|-----------|----------|
//! | `ecdsa` | secp256k1 | Transaction signing, signer recovery |
//! | `recovery` | secp256k1 + LRU | `SenderRecovery` for the pool and the executor |
//!
//! Hashing is Keccak-256 from `shared_types::keccak256`.

#![warn(clippy::all)]

pub mod ecdsa;
pub mod errors;
pub mod recovery;

// Re-exports
pub use ecdsa::{public_key_to_address, recover_address, Secp256k1KeyPair};
pub use errors::CryptoError;
pub use recovery::Secp256k1Recovery;
pub use shared_types::keccak256;
