//! Seams consumed by several crates.

use crate::entities::{Address, Transaction};
use crate::errors::SignatureError;

/// Recovers the address that signed a transaction.
///
/// Production: `shared_crypto::Secp256k1Recovery`.
pub trait SenderRecovery: Send + Sync {
    fn recover_sender(&self, tx: &Transaction) -> Result<Address, SignatureError>;
}
