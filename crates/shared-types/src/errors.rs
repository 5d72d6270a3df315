//! # Error Types
//!
//! Errors raised by the shared codecs and the signature seam.

use thiserror::Error;

/// Sender recovery failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// The `(r, s)` pair is not a valid secp256k1 signature.
    #[error("malformed signature: {0}")]
    Malformed(String),

    /// Recovery id outside `0..=3`.
    #[error("invalid recovery id {0}")]
    InvalidRecoveryId(u8),

    /// No public key recovers from this signature and digest.
    #[error("signer recovery failed: {0}")]
    RecoveryFailed(String),
}

/// Wire codec failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("message encoding failed: {0}")]
    Encode(String),

    #[error("message decoding failed: {0}")]
    Decode(String),

    #[error("message of {size} bytes exceeds limit of {limit}")]
    TooLarge { size: usize, limit: usize },
}

/// State trie node codec failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrieError {
    #[error("unknown trie node tag {0:#04x}")]
    UnknownTag(u8),

    #[error("truncated trie node: needed {needed} bytes, {available} left")]
    Truncated { needed: usize, available: usize },

    #[error("malformed trie node: {0}")]
    Malformed(String),
}
