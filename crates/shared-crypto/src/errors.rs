//! Crypto error types.

use shared_types::SignatureError;
use thiserror::Error;

/// Cryptographic operation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Secret key bytes are zero or not below the curve order.
    #[error("Invalid private key")]
    InvalidPrivateKey,

    /// Signing the digest failed.
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// Signature bytes do not form a valid signature.
    #[error("Invalid signature format")]
    InvalidSignatureFormat,

    /// Recovery id is not 0..=3.
    #[error("Invalid recovery id {0}")]
    InvalidRecoveryId(u8),

    /// No public key recovers from the signature.
    #[error("Public key recovery failed")]
    RecoveryFailed,
}

impl From<CryptoError> for SignatureError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidRecoveryId(v) => SignatureError::InvalidRecoveryId(v),
            CryptoError::InvalidSignatureFormat => {
                SignatureError::Malformed("invalid (r, s) encoding".into())
            }
            other => SignatureError::RecoveryFailed(other.to_string()),
        }
    }
}
