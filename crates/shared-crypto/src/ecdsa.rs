//! # ECDSA Signatures (secp256k1)
//!
//! Recoverable signatures over 32-byte prehashed digests.
//!
//! ## Security Properties
//!
//! - RFC 6979 deterministic nonces
//! - Low-S normalization
//! - Address = last 20 bytes of Keccak-256 over the uncompressed public key

use crate::CryptoError;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use shared_types::{keccak256, Address, Hash, Transaction, TxSignature};
use zeroize::Zeroize;

/// Address controlled by a public key.
pub fn public_key_to_address(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let digest = keccak256(&point.as_bytes()[1..]);
    let mut address = [0u8; 20];
    address.copy_from_slice(&digest[12..]);
    address
}

/// Recovers the signer address of a prehashed digest.
pub fn recover_address(digest: &Hash, signature: &TxSignature) -> Result<Address, CryptoError> {
    let mut rs = [0u8; 64];
    rs[..32].copy_from_slice(&signature.r);
    rs[32..].copy_from_slice(&signature.s);
    let sig = Signature::from_slice(&rs).map_err(|_| CryptoError::InvalidSignatureFormat)?;
    let recovery_id = RecoveryId::from_byte(signature.v)
        .ok_or(CryptoError::InvalidRecoveryId(signature.v))?;
    let key = VerifyingKey::recover_from_prehash(digest, &sig, recovery_id)
        .map_err(|_| CryptoError::RecoveryFailed)?;
    Ok(public_key_to_address(&key))
}

/// secp256k1 key pair used to sign transactions.
#[derive(Clone)]
pub struct Secp256k1KeyPair {
    signing_key: SigningKey,
}

impl Secp256k1KeyPair {
    /// Generate random keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut rand::thread_rng());
        Self { signing_key }
    }

    /// Create from secret key bytes (32 bytes).
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self, CryptoError> {
        let signing_key =
            SigningKey::from_bytes((&bytes).into()).map_err(|_| CryptoError::InvalidPrivateKey)?;
        Ok(Self { signing_key })
    }

    /// Deterministic key derived from a seed byte, for tests and dev networks.
    pub fn from_seed(seed: u8) -> Result<Self, CryptoError> {
        let mut secret = keccak256(&[seed]);
        let key = Self::from_bytes(secret);
        secret.zeroize();
        key
    }

    pub fn address(&self) -> Address {
        public_key_to_address(self.signing_key.verifying_key())
    }

    /// Signs a 32-byte digest.
    pub fn sign_hash(&self, digest: &Hash) -> Result<TxSignature, CryptoError> {
        let (sig, recovery_id) = self
            .signing_key
            .sign_prehash_recoverable(digest)
            .map_err(|e| CryptoError::SigningFailed(e.to_string()))?;
        let bytes = sig.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Ok(TxSignature {
            v: recovery_id.to_byte(),
            r,
            s,
        })
    }

    /// Returns `tx` carrying this key's signature over its signing hash.
    pub fn sign_transaction(&self, mut tx: Transaction) -> Result<Transaction, CryptoError> {
        tx.signature = self.sign_hash(&tx.signing_hash())?;
        Ok(tx)
    }
}

impl Drop for Secp256k1KeyPair {
    fn drop(&mut self) {
        // Zeroize secret key material
        let mut bytes: [u8; 32] = self.signing_key.to_bytes().into();
        bytes.zeroize();
    }
}
