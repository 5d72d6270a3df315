//! Cached sender recovery.

use crate::ecdsa::recover_address;
use lru::LruCache;
use parking_lot::Mutex;
use shared_types::{Address, Hash, SenderRecovery, SignatureError, Transaction};
use std::num::NonZeroUsize;

/// Default number of recovered senders kept in memory.
pub const DEFAULT_SENDER_CACHE: usize = 16_384;

/// `SenderRecovery` backed by secp256k1 public key recovery.
///
/// Recovered senders are cached by transaction hash, so a transaction seen by
/// the pool and later by block execution is only recovered once.
pub struct Secp256k1Recovery {
    cache: Mutex<LruCache<Hash, Address>>,
}

impl Secp256k1Recovery {
    pub fn new() -> Self {
        Self::with_cache_size(DEFAULT_SENDER_CACHE)
    }

    pub fn with_cache_size(size: usize) -> Self {
        let size = NonZeroUsize::new(size).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(size)),
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.lock().len()
    }
}

impl Default for Secp256k1Recovery {
    fn default() -> Self {
        Self::new()
    }
}

impl SenderRecovery for Secp256k1Recovery {
    fn recover_sender(&self, tx: &Transaction) -> Result<Address, SignatureError> {
        let hash = tx.hash();
        if let Some(sender) = self.cache.lock().get(&hash) {
            return Ok(*sender);
        }
        let sender = recover_address(&tx.signing_hash(), &tx.signature)?;
        self.cache.lock().put(hash, sender);
        Ok(sender)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Secp256k1KeyPair;
    use shared_types::U256;

    #[test]
    fn test_recovery_is_cached() {
        let key = Secp256k1KeyPair::from_seed(1).unwrap();
        let tx = key
            .sign_transaction(Transaction {
                gas_limit: 21_000,
                gas_price: U256::one(),
                ..Default::default()
            })
            .unwrap();

        let recovery = Secp256k1Recovery::with_cache_size(4);
        assert_eq!(recovery.recover_sender(&tx).unwrap(), key.address());
        assert_eq!(recovery.cached(), 1);
        assert_eq!(recovery.recover_sender(&tx).unwrap(), key.address());
        assert_eq!(recovery.cached(), 1);
    }

    #[test]
    fn test_unsigned_transaction_fails() {
        let recovery = Secp256k1Recovery::new();
        assert!(recovery.recover_sender(&Transaction::default()).is_err());
        assert_eq!(recovery.cached(), 0);
    }
}
