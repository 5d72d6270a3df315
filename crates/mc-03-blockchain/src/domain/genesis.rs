//! # Genesis Block
//!
//! The genesis block is derived from its allocation and committed on first
//! open. Later opens compare the stored genesis hash with the configured one.

use super::world_state::WorldState;
use serde::{Deserialize, Serialize};
use shared_types::{
    receipts_root, transactions_root, uncles_hash, Account, Address, Block, BlockHeader, U256,
};

/// Pre-funded account in the genesis state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisAccount {
    pub address: Address,
    pub balance: U256,
    #[serde(default)]
    pub nonce: u64,
}

/// Genesis block configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Genesis {
    pub alloc: Vec<GenesisAccount>,
    pub difficulty: U256,
    pub gas_limit: u64,
    pub timestamp: u64,
    pub extra_data: Vec<u8>,
    pub coinbase: Address,
}

impl Default for Genesis {
    fn default() -> Self {
        Self {
            alloc: Vec::new(),
            difficulty: U256::from(1),
            gas_limit: 8_000_000,
            timestamp: 0,
            extra_data: b"Meridian-Chain Genesis".to_vec(),
            coinbase: [0u8; 20],
        }
    }
}

impl Genesis {
    /// A development genesis funding each address with `balance`.
    pub fn dev(funded: &[Address], balance: U256) -> Self {
        Self {
            alloc: funded
                .iter()
                .map(|address| GenesisAccount {
                    address: *address,
                    balance,
                    nonce: 0,
                })
                .collect(),
            ..Default::default()
        }
    }

    pub fn state(&self) -> WorldState {
        let mut state = WorldState::new();
        for entry in &self.alloc {
            state.set_account(entry.address, Account::new(entry.nonce, entry.balance));
        }
        state
    }

    pub fn to_block(&self) -> Block {
        let header = BlockHeader {
            parent_hash: [0u8; 32],
            number: 0,
            coinbase: self.coinbase,
            state_root: self.state().root(),
            transactions_root: transactions_root(&[]),
            receipts_root: receipts_root(&[]),
            uncles_hash: uncles_hash(&[]),
            difficulty: self.difficulty,
            gas_limit: self.gas_limit,
            gas_used: 0,
            timestamp: self.timestamp,
            extra_data: self.extra_data.clone(),
            mix_digest: [0u8; 32],
            nonce: 0,
        };
        Block {
            header,
            transactions: Vec::new(),
            uncles: Vec::new(),
        }
    }
}
