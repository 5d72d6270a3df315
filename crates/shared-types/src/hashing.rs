//! Keccak-256 hashing and body commitments.

use crate::entities::Hash;
use sha3::{Digest, Keccak256};

/// Keccak-256 of the empty byte string. Root of every empty sequence.
pub const EMPTY_ROOT: Hash = [
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03, 0xc0,
    0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85, 0xa4, 0x70,
];

/// Keccak-256 digest of `data`.
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Binary merkle root over leaf hashes.
///
/// Odd levels duplicate their last node. An empty leaf set yields [`EMPTY_ROOT`].
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return EMPTY_ROOT;
    }
    let mut level: Vec<Hash> = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let right = pair.get(1).unwrap_or(&pair[0]);
                let mut hasher = Keccak256::new();
                hasher.update(pair[0]);
                hasher.update(right);
                hasher.finalize().into()
            })
            .collect();
    }
    level[0]
}

/// Keccak-256 over the concatenation of `hashes`.
pub fn concat_hash(hashes: &[Hash]) -> Hash {
    let mut hasher = Keccak256::new();
    for hash in hashes {
        hasher.update(hash);
    }
    hasher.finalize().into()
}
