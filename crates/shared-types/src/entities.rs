//! # Core Domain Entities
//!
//! ## Clusters
//!
//! - **Chain**: `BlockHeader`, `Block`, `BlockBody`
//! - **Transactions**: `Transaction`, `TxSignature`, `Receipt`, `Log`
//! - **State**: `Account`
//! - **Networking**: `PeerId`

use crate::hashing::{concat_hash, keccak256, merkle_root};
use serde::{Deserialize, Serialize};
use std::fmt;

// Re-export U256 from primitive-types for use across all crates
pub use primitive_types::U256;

/// A 32-byte Keccak-256 digest.
pub type Hash = [u8; 32];

/// A 20-byte account address.
pub type Address = [u8; 20];

/// Gas charged for every transaction before payload costs.
pub const TX_BASE_GAS: u64 = 21_000;

/// Gas charged per non-zero payload byte.
pub const TX_DATA_NON_ZERO_GAS: u64 = 16;

/// Gas charged per zero payload byte.
pub const TX_DATA_ZERO_GAS: u64 = 4;

/// Unique identifier of a remote node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    /// Builds an id whose first byte is `tag` and the rest zero. Handy for tests and tools.
    pub fn from_byte(tag: u8) -> Self {
        let mut id = [0u8; 32];
        id[0] = tag;
        Self(id)
    }

    /// Short hex form used in logs.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short())
    }
}

/// Canonical byte encoder used for content hashes.
///
/// Fixed-width integers are big-endian, `U256` is 32 bytes, variable byte
/// strings carry a 4-byte length prefix.
#[derive(Default)]
pub(crate) struct HashEncoder {
    buf: Vec<u8>,
}

impl HashEncoder {
    pub(crate) fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub(crate) fn u256(&mut self, v: &U256) -> &mut Self {
        let mut word = [0u8; 32];
        v.to_big_endian(&mut word);
        self.buf.extend_from_slice(&word);
        self
    }

    pub(crate) fn fixed(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub(crate) fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf
            .extend_from_slice(&(bytes.len() as u32).to_be_bytes());
        self.buf.extend_from_slice(bytes);
        self
    }

    pub(crate) fn finish(&self) -> Hash {
        keccak256(&self.buf)
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

// =============================================================================
// CLUSTER A: THE CHAIN
// =============================================================================

/// Block header. Identity is the Keccak-256 of its canonical encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlockHeader {
    /// Hash of the parent block.
    pub parent_hash: Hash,
    /// Height in the chain; genesis is 0.
    pub number: u64,
    /// Block author, credited with the block reward.
    pub coinbase: Address,
    /// Root of the post-execution state trie.
    pub state_root: Hash,
    /// Merkle root of the transaction hashes.
    pub transactions_root: Hash,
    /// Merkle root of the receipt hashes.
    pub receipts_root: Hash,
    /// Keccak-256 over the uncle header hashes.
    pub uncles_hash: Hash,
    /// Fork-choice weight contributed by this block.
    pub difficulty: U256,
    /// Gas available to transactions in this block.
    pub gas_limit: u64,
    /// Gas consumed by transactions in this block.
    pub gas_used: u64,
    /// Unix timestamp in seconds.
    pub timestamp: u64,
    /// Opaque bytes, at most 32 under the reference engine.
    pub extra_data: Vec<u8>,
    /// Seal field consumed by the consensus engine.
    pub mix_digest: Hash,
    /// Seal field consumed by the consensus engine.
    pub nonce: u64,
}

impl BlockHeader {
    /// Content hash of the header.
    pub fn hash(&self) -> Hash {
        let mut enc = HashEncoder::default();
        enc.fixed(&self.parent_hash)
            .u64(self.number)
            .fixed(&self.coinbase)
            .fixed(&self.state_root)
            .fixed(&self.transactions_root)
            .fixed(&self.receipts_root)
            .fixed(&self.uncles_hash)
            .u256(&self.difficulty)
            .u64(self.gas_limit)
            .u64(self.gas_used)
            .u64(self.timestamp)
            .bytes(&self.extra_data)
            .fixed(&self.mix_digest)
            .u64(self.nonce);
        enc.finish()
    }
}

/// Transactions and uncles of a block, the unit of body download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BlockBody {
    pub transactions: Vec<Transaction>,
    pub uncles: Vec<BlockHeader>,
}

impl BlockBody {
    /// Merkle root of the body's transaction hashes.
    pub fn transactions_root(&self) -> Hash {
        transactions_root(&self.transactions)
    }

    /// Hash over the body's uncle header hashes.
    pub fn uncles_hash(&self) -> Hash {
        uncles_hash(&self.uncles)
    }

    /// Whether this body is the one committed to by `header`.
    pub fn matches(&self, header: &BlockHeader) -> bool {
        self.transactions_root() == header.transactions_root
            && self.uncles_hash() == header.uncles_hash
    }
}

/// A header with its ordered transactions and uncles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub uncles: Vec<BlockHeader>,
}

impl Block {
    pub fn new(header: BlockHeader, body: BlockBody) -> Self {
        Self {
            header,
            transactions: body.transactions,
            uncles: body.uncles,
        }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn parent_hash(&self) -> Hash {
        self.header.parent_hash
    }

    pub fn body(&self) -> BlockBody {
        BlockBody {
            transactions: self.transactions.clone(),
            uncles: self.uncles.clone(),
        }
    }
}

/// Merkle root of the given transactions' hashes.
pub fn transactions_root(txs: &[Transaction]) -> Hash {
    let leaves: Vec<Hash> = txs.iter().map(Transaction::hash).collect();
    merkle_root(&leaves)
}

/// Hash committing to an ordered list of uncle headers.
pub fn uncles_hash(uncles: &[BlockHeader]) -> Hash {
    let hashes: Vec<Hash> = uncles.iter().map(BlockHeader::hash).collect();
    concat_hash(&hashes)
}

/// Merkle root of the given receipts' hashes.
pub fn receipts_root(receipts: &[Receipt]) -> Hash {
    let leaves: Vec<Hash> = receipts.iter().map(Receipt::hash).collect();
    merkle_root(&leaves)
}

/// Block lookup key used by header requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HashOrNumber {
    Hash(Hash),
    Number(u64),
}

// =============================================================================
// CLUSTER B: TRANSACTIONS
// =============================================================================

/// Recoverable secp256k1 signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TxSignature {
    /// Recovery id (0 or 1).
    pub v: u8,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

/// A sender-signed transaction. The sender is recovered from the signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Transaction {
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_limit: u64,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub value: U256,
    pub data: Vec<u8>,
    pub signature: TxSignature,
}

impl Transaction {
    fn encode_unsigned(&self, enc: &mut HashEncoder) {
        enc.u64(self.nonce)
            .u256(&self.gas_price)
            .u64(self.gas_limit);
        match &self.to {
            Some(to) => enc.fixed(&[1]).fixed(to),
            None => enc.fixed(&[0]),
        };
        enc.u256(&self.value).bytes(&self.data);
    }

    /// Digest the sender signs: every field except the signature.
    pub fn signing_hash(&self) -> Hash {
        let mut enc = HashEncoder::default();
        self.encode_unsigned(&mut enc);
        enc.finish()
    }

    /// Transaction identity, covering the signature.
    pub fn hash(&self) -> Hash {
        let mut enc = HashEncoder::default();
        self.encode_unsigned(&mut enc);
        enc.fixed(&[self.signature.v])
            .fixed(&self.signature.r)
            .fixed(&self.signature.s);
        enc.finish()
    }

    /// Maximum amount the sender can be charged: `value + gas_limit * gas_price`.
    pub fn cost(&self) -> U256 {
        self.gas_price
            .saturating_mul(U256::from(self.gas_limit))
            .saturating_add(self.value)
    }

    /// Gas charged before any execution takes place.
    pub fn intrinsic_gas(&self) -> u64 {
        self.data.iter().fold(TX_BASE_GAS, |gas, byte| {
            gas.saturating_add(if *byte == 0 {
                TX_DATA_ZERO_GAS
            } else {
                TX_DATA_NON_ZERO_GAS
            })
        })
    }

    /// Approximate wire size in bytes.
    pub fn size(&self) -> usize {
        let mut enc = HashEncoder::default();
        self.encode_unsigned(&mut enc);
        enc.into_bytes().len() + 65
    }
}

/// Event emitted during execution.
///
/// Position fields are filled in when the log's block is committed and are not
/// part of the receipt hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<Hash>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub block_hash: Hash,
    pub tx_hash: Hash,
    pub tx_index: u32,
    /// Set when the log's block was detached by a reorg.
    pub removed: bool,
}

/// Outcome of executing one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Receipt {
    pub success: bool,
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
    pub logs: Vec<Log>,
}

impl Receipt {
    /// Consensus hash of the receipt. Log position fields are excluded.
    pub fn hash(&self) -> Hash {
        let mut enc = HashEncoder::default();
        enc.fixed(&[u8::from(self.success)])
            .u64(self.gas_used)
            .u64(self.cumulative_gas_used)
            .u64(self.logs.len() as u64);
        for log in &self.logs {
            enc.fixed(&log.address).u64(log.topics.len() as u64);
            for topic in &log.topics {
                enc.fixed(topic);
            }
            enc.bytes(&log.data);
        }
        enc.finish()
    }
}

// =============================================================================
// CLUSTER C: STATE
// =============================================================================

/// Account record held in the state trie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Account {
    pub nonce: u64,
    pub balance: U256,
}

impl Account {
    pub fn new(nonce: u64, balance: U256) -> Self {
        Self { nonce, balance }
    }

    /// Empty accounts are not stored in the trie.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx(nonce: u64) -> Transaction {
        Transaction {
            nonce,
            gas_price: U256::from(2),
            gas_limit: 21_000,
            to: Some([7u8; 20]),
            value: U256::from(1_000),
            data: vec![],
            signature: TxSignature {
                v: 1,
                r: [1u8; 32],
                s: [2u8; 32],
            },
        }
    }

    #[test]
    fn test_header_hash_changes_with_any_field() {
        let header = BlockHeader::default();
        let mut bumped = header.clone();
        bumped.nonce = 1;
        assert_ne!(header.hash(), bumped.hash());

        let mut extra = header.clone();
        extra.extra_data = vec![0];
        assert_ne!(header.hash(), extra.hash());
    }

    #[test]
    fn test_signing_hash_ignores_signature() {
        let tx = sample_tx(0);
        let mut resigned = tx.clone();
        resigned.signature.v = 0;
        assert_eq!(tx.signing_hash(), resigned.signing_hash());
        assert_ne!(tx.hash(), resigned.hash());
    }

    #[test]
    fn test_cost_and_intrinsic_gas() {
        let mut tx = sample_tx(0);
        assert_eq!(tx.cost(), U256::from(1_000 + 2 * 21_000));
        assert_eq!(tx.intrinsic_gas(), TX_BASE_GAS);
        tx.data = vec![0, 1, 2];
        assert_eq!(
            tx.intrinsic_gas(),
            TX_BASE_GAS + TX_DATA_ZERO_GAS + 2 * TX_DATA_NON_ZERO_GAS
        );
    }

    #[test]
    fn test_body_matches_header_roots() {
        let body = BlockBody {
            transactions: vec![sample_tx(0), sample_tx(1)],
            uncles: vec![],
        };
        let header = BlockHeader {
            transactions_root: body.transactions_root(),
            uncles_hash: body.uncles_hash(),
            ..Default::default()
        };
        assert!(body.matches(&header));

        let tampered = BlockBody {
            transactions: vec![sample_tx(1), sample_tx(0)],
            uncles: vec![],
        };
        assert!(!tampered.matches(&header));
    }

    #[test]
    fn test_receipt_hash_ignores_log_position() {
        let log = Log {
            address: [1u8; 20],
            topics: vec![[3u8; 32]],
            data: vec![9],
            ..Default::default()
        };
        let receipt = Receipt {
            success: true,
            gas_used: 21_000,
            cumulative_gas_used: 21_000,
            logs: vec![log.clone()],
        };
        let mut positioned = receipt.clone();
        positioned.logs[0].block_number = 10;
        positioned.logs[0].removed = true;
        assert_eq!(receipt.hash(), positioned.hash());
    }

    #[test]
    fn test_peer_id_ordering_follows_bytes() {
        assert!(PeerId::from_byte(1) < PeerId::from_byte(2));
        assert_eq!(PeerId::from_byte(0xab).short(), "ab00000000000000");
    }
}
