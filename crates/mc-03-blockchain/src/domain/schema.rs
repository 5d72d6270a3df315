//! # Storage Schema
//!
//! | Prefix | Key | Value |
//! |--------|-----|-------|
//! | `h` | number ‖ hash | header |
//! | `b` | number ‖ hash | body |
//! | `r` | number ‖ hash | receipts |
//! | `t` | number ‖ hash | total difficulty |
//! | `c` | number | canonical hash |
//! | `H` | hash | number |
//! | `s` | node hash | state trie node |
//! | `l` | tx hash | transaction lookup |
//! | - | `LastBlock` | head block hash |
//! | - | `LastFast` | fast-sync head hash |
//!
//! Numbers are 8-byte big-endian so canonical keys sort by height. Values are
//! `bincode`.

use super::errors::ChainError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use shared_types::Hash;

pub const HEAD_BLOCK_KEY: &[u8] = b"LastBlock";
pub const HEAD_FAST_KEY: &[u8] = b"LastFast";

const HEADER_PREFIX: u8 = b'h';
const BODY_PREFIX: u8 = b'b';
const RECEIPTS_PREFIX: u8 = b'r';
const TD_PREFIX: u8 = b't';
const CANONICAL_PREFIX: u8 = b'c';
const NUMBER_PREFIX: u8 = b'H';
const STATE_PREFIX: u8 = b's';
const TX_LOOKUP_PREFIX: u8 = b'l';

/// Where a canonical transaction lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxLookup {
    pub block_hash: Hash,
    pub block_number: u64,
    pub index: u32,
}

fn numbered(prefix: u8, number: u64, hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 8 + 32);
    key.push(prefix);
    key.extend_from_slice(&number.to_be_bytes());
    key.extend_from_slice(hash);
    key
}

fn hashed(prefix: u8, hash: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + 32);
    key.push(prefix);
    key.extend_from_slice(hash);
    key
}

pub fn header_key(number: u64, hash: &Hash) -> Vec<u8> {
    numbered(HEADER_PREFIX, number, hash)
}

pub fn body_key(number: u64, hash: &Hash) -> Vec<u8> {
    numbered(BODY_PREFIX, number, hash)
}

pub fn receipts_key(number: u64, hash: &Hash) -> Vec<u8> {
    numbered(RECEIPTS_PREFIX, number, hash)
}

pub fn td_key(number: u64, hash: &Hash) -> Vec<u8> {
    numbered(TD_PREFIX, number, hash)
}

pub fn canonical_key(number: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(9);
    key.push(CANONICAL_PREFIX);
    key.extend_from_slice(&number.to_be_bytes());
    key
}

pub fn number_key(hash: &Hash) -> Vec<u8> {
    hashed(NUMBER_PREFIX, hash)
}

pub fn state_key(node_hash: &Hash) -> Vec<u8> {
    hashed(STATE_PREFIX, node_hash)
}

pub fn tx_lookup_key(tx_hash: &Hash) -> Vec<u8> {
    hashed(TX_LOOKUP_PREFIX, tx_hash)
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ChainError> {
    bincode::serialize(value).map_err(|e| ChainError::Codec(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ChainError> {
    bincode::deserialize(bytes).map_err(|e| ChainError::Codec(e.to_string()))
}
