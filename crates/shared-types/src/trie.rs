//! # State Trie
//!
//! Two-level state commitment fetched node by node during state sync.
//!
//! ```text
//!                 Branch (root)
//!        ┌──────────┼──────────┐
//!   nibble 0x0   nibble 0x7   nibble 0xf
//!        │          │          │
//!      Leaf       Leaf       Leaf      each leaf: accounts whose address
//!                                      starts with that nibble, sorted
//! ```
//!
//! Node hash = Keccak-256 of the node's byte encoding:
//!
//! | Node | Encoding |
//! |------|----------|
//! | Branch | `0x01`, 16-bit child bitmap, child hashes in nibble order |
//! | Leaf | `0x02`, u32 count, then `address ‖ nonce(u64) ‖ balance(u256)` per account |
//!
//! Empty accounts are never stored.

use crate::entities::{Account, Address, Hash, U256};
use crate::errors::TrieError;
use crate::hashing::keccak256;
use std::collections::BTreeMap;

const BRANCH_TAG: u8 = 0x01;
const LEAF_TAG: u8 = 0x02;
const ACCOUNT_ENTRY_LEN: usize = 20 + 8 + 32;

/// A node of the state trie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrieNode {
    /// Root node: one optional leaf per leading address nibble.
    Branch { children: Box<[Option<Hash>; 16]> },
    /// Accounts sharing a leading nibble, ordered by address.
    Leaf { accounts: Vec<(Address, Account)> },
}

impl TrieNode {
    /// Byte encoding; its Keccak-256 is the node hash.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            TrieNode::Branch { children } => {
                let mut bitmap: u16 = 0;
                let mut out = Vec::with_capacity(3 + 32 * 16);
                for (i, child) in children.iter().enumerate() {
                    if child.is_some() {
                        bitmap |= 1 << i;
                    }
                }
                out.push(BRANCH_TAG);
                out.extend_from_slice(&bitmap.to_be_bytes());
                for hash in children.iter().flatten() {
                    out.extend_from_slice(hash);
                }
                out
            }
            TrieNode::Leaf { accounts } => {
                let mut out = Vec::with_capacity(5 + accounts.len() * ACCOUNT_ENTRY_LEN);
                out.push(LEAF_TAG);
                out.extend_from_slice(&(accounts.len() as u32).to_be_bytes());
                for (address, account) in accounts {
                    let mut balance = [0u8; 32];
                    account.balance.to_big_endian(&mut balance);
                    out.extend_from_slice(address);
                    out.extend_from_slice(&account.nonce.to_be_bytes());
                    out.extend_from_slice(&balance);
                }
                out
            }
        }
    }

    /// Decodes and validates a node.
    pub fn decode(bytes: &[u8]) -> Result<Self, TrieError> {
        let (&tag, rest) = bytes.split_first().ok_or(TrieError::Truncated {
            needed: 1,
            available: 0,
        })?;
        match tag {
            BRANCH_TAG => Self::decode_branch(rest),
            LEAF_TAG => Self::decode_leaf(rest),
            other => Err(TrieError::UnknownTag(other)),
        }
    }

    fn decode_branch(rest: &[u8]) -> Result<Self, TrieError> {
        let bitmap_bytes = take(rest, 0, 2)?;
        let bitmap = u16::from_be_bytes([bitmap_bytes[0], bitmap_bytes[1]]);
        let expected = 2 + bitmap.count_ones() as usize * 32;
        if rest.len() != expected {
            return Err(TrieError::Malformed(format!(
                "branch length {} does not match bitmap ({} expected)",
                rest.len(),
                expected
            )));
        }
        let mut children: Box<[Option<Hash>; 16]> = Box::new([None; 16]);
        let mut offset = 2;
        for (i, slot) in children.iter_mut().enumerate() {
            if bitmap & (1 << i) != 0 {
                let mut hash = [0u8; 32];
                hash.copy_from_slice(take(rest, offset, 32)?);
                *slot = Some(hash);
                offset += 32;
            }
        }
        Ok(TrieNode::Branch { children })
    }

    fn decode_leaf(rest: &[u8]) -> Result<Self, TrieError> {
        let count_bytes = take(rest, 0, 4)?;
        let count =
            u32::from_be_bytes([count_bytes[0], count_bytes[1], count_bytes[2], count_bytes[3]])
                as usize;
        let expected = 4 + count.saturating_mul(ACCOUNT_ENTRY_LEN);
        if rest.len() != expected {
            return Err(TrieError::Malformed(format!(
                "leaf length {} does not match count {}",
                rest.len(),
                count
            )));
        }
        let mut accounts = Vec::with_capacity(count);
        for i in 0..count {
            let entry = take(rest, 4 + i * ACCOUNT_ENTRY_LEN, ACCOUNT_ENTRY_LEN)?;
            let mut address = [0u8; 20];
            address.copy_from_slice(&entry[..20]);
            let mut nonce = [0u8; 8];
            nonce.copy_from_slice(&entry[20..28]);
            let balance = U256::from_big_endian(&entry[28..60]);
            if let Some((prev, _)) = accounts.last() {
                if *prev >= address {
                    return Err(TrieError::Malformed("leaf accounts out of order".into()));
                }
            }
            accounts.push((address, Account::new(u64::from_be_bytes(nonce), balance)));
        }
        Ok(TrieNode::Leaf { accounts })
    }

    pub fn hash(&self) -> Hash {
        keccak256(&self.encode())
    }

    /// Hashes of the nodes this node references.
    pub fn children(&self) -> Vec<Hash> {
        match self {
            TrieNode::Branch { children } => children.iter().flatten().copied().collect(),
            TrieNode::Leaf { .. } => Vec::new(),
        }
    }
}

fn take(bytes: &[u8], offset: usize, len: usize) -> Result<&[u8], TrieError> {
    bytes
        .get(offset..offset + len)
        .ok_or(TrieError::Truncated {
            needed: len,
            available: bytes.len().saturating_sub(offset),
        })
}

/// Root hash and every node of a committed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateCommitment {
    pub root: Hash,
    /// `(hash, encoded node)`, root first.
    pub nodes: Vec<(Hash, Vec<u8>)>,
}

/// Root of a state with no accounts.
pub fn empty_state_root() -> Hash {
    TrieNode::Branch {
        children: Box::new([None; 16]),
    }
    .hash()
}

/// Commits a full account set, skipping empty accounts.
pub fn commit_accounts(accounts: &BTreeMap<Address, Account>) -> StateCommitment {
    let mut buckets: [Vec<(Address, Account)>; 16] = Default::default();
    for (address, account) in accounts.iter().filter(|(_, a)| !a.is_empty()) {
        buckets[(address[0] >> 4) as usize].push((*address, *account));
    }

    let mut nodes = Vec::new();
    let mut children: Box<[Option<Hash>; 16]> = Box::new([None; 16]);
    for (i, bucket) in buckets.into_iter().enumerate() {
        if bucket.is_empty() {
            continue;
        }
        let leaf = TrieNode::Leaf { accounts: bucket };
        let encoded = leaf.encode();
        let hash = keccak256(&encoded);
        children[i] = Some(hash);
        nodes.push((hash, encoded));
    }

    let root_node = TrieNode::Branch { children };
    let encoded = root_node.encode();
    let root = keccak256(&encoded);
    nodes.insert(0, (root, encoded));
    StateCommitment { root, nodes }
}

/// Index of the root branch child that holds `address`.
pub fn leaf_slot(address: &Address) -> usize {
    (address[0] >> 4) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn addr(first: u8, last: u8) -> Address {
        let mut a = [0u8; 20];
        a[0] = first;
        a[19] = last;
        a
    }

    #[test]
    fn test_empty_commitment() {
        let commitment = commit_accounts(&BTreeMap::new());
        assert_eq!(commitment.root, empty_state_root());
        assert_eq!(commitment.nodes.len(), 1);
    }

    #[test]
    fn test_empty_accounts_are_skipped() {
        let mut accounts = BTreeMap::new();
        accounts.insert(addr(0x10, 1), Account::default());
        assert_eq!(commit_accounts(&accounts).root, empty_state_root());
    }

    #[test]
    fn test_accounts_grouped_by_leading_nibble() {
        let mut accounts = BTreeMap::new();
        accounts.insert(addr(0x10, 1), Account::new(1, U256::from(5)));
        accounts.insert(addr(0x1f, 2), Account::new(0, U256::from(7)));
        accounts.insert(addr(0xa0, 3), Account::new(3, U256::zero()));

        let commitment = commit_accounts(&accounts);
        assert_eq!(commitment.nodes.len(), 3);

        let root = TrieNode::decode(&commitment.nodes[0].1).unwrap();
        let children = root.children();
        assert_eq!(children.len(), 2);

        let TrieNode::Branch { children: slots } = root else {
            panic!("root must be a branch");
        };
        assert!(slots[1].is_some());
        assert!(slots[0xa].is_some());
        assert_eq!(leaf_slot(&addr(0xa0, 3)), 0xa);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(TrieNode::decode(&[]), Err(TrieError::Truncated { .. })));
        assert!(matches!(TrieNode::decode(&[9]), Err(TrieError::UnknownTag(9))));
        assert!(matches!(
            TrieNode::decode(&[BRANCH_TAG, 0, 1]),
            Err(TrieError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_rejects_unordered_leaf() {
        let leaf = TrieNode::Leaf {
            accounts: vec![
                (addr(0x10, 2), Account::new(1, U256::one())),
                (addr(0x10, 1), Account::new(1, U256::one())),
            ],
        };
        assert!(matches!(
            TrieNode::decode(&leaf.encode()),
            Err(TrieError::Malformed(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_commitment_nodes_decode_to_their_hash(
            entries in proptest::collection::btree_map(any::<[u8; 20]>(), (0u64..1000, 1u64..u64::MAX), 0..40)
        ) {
            let accounts: BTreeMap<Address, Account> = entries
                .into_iter()
                .map(|(a, (n, b))| (a, Account::new(n, U256::from(b))))
                .collect();
            let commitment = commit_accounts(&accounts);
            for (hash, bytes) in &commitment.nodes {
                let node = TrieNode::decode(bytes).unwrap();
                prop_assert_eq!(node.hash(), *hash);
            }
        }
    }
}
