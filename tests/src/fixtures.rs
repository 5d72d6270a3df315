//! Shared fixtures: one funded dev account, signed transfers and chain
//! builders on its genesis.

use mc_03_blockchain::{BlockChain, ChainMaker, ConsensusEngine, ExecutionEngine, Genesis};
use shared_crypto::Secp256k1KeyPair;
use shared_types::{Block, BlockHeader, HashOrNumber, Transaction, U256};
use std::sync::Arc;
use std::time::Duration;

pub const FUNDS: u64 = 1_000_000_000_000_000_000;

pub fn alice() -> Secp256k1KeyPair {
    Secp256k1KeyPair::from_seed(1).expect("seed 1 is a valid key")
}

/// Genesis funding alice.
pub fn genesis() -> Genesis {
    Genesis::dev(&[alice().address()], U256::from(FUNDS))
}

/// A signed transfer from alice.
pub fn transfer(nonce: u64, price: u64) -> Transaction {
    alice()
        .sign_transaction(Transaction {
            nonce,
            gas_price: U256::from(price),
            gas_limit: 21_000,
            to: Some([0xee; 20]),
            value: U256::from(1),
            ..Default::default()
        })
        .expect("alice signs")
}

/// Shape of generated blocks.
#[derive(Debug, Clone, Copy)]
pub struct Branch {
    pub difficulty: u64,
    pub coinbase: u8,
    /// Carry one transfer per block, nonces from zero.
    pub transfers: bool,
}

impl Default for Branch {
    fn default() -> Self {
        Self {
            difficulty: 1_000,
            coinbase: 0,
            transfers: true,
        }
    }
}

/// `n` blocks on `genesis` shaped by `branch`.
pub fn build(
    engine: &Arc<dyn ConsensusEngine>,
    executor: &Arc<dyn ExecutionEngine>,
    genesis: &Genesis,
    n: usize,
    branch: Branch,
) -> Vec<Block> {
    ChainMaker::new(engine.clone(), executor.clone())
        .generate(&genesis.to_block(), &genesis.state(), n, |i, gen| {
            gen.set_difficulty(U256::from(branch.difficulty));
            gen.set_coinbase([branch.coinbase; 20]);
            if branch.transfers {
                gen.add_tx(transfer(i as u64, 1)).expect("transfer applies");
            }
        })
        .expect("chain generation")
}

/// Canonical headers from genesis to the head.
pub fn canonical_headers(chain: &BlockChain) -> Vec<BlockHeader> {
    let head = chain.current_block().number();
    chain.get_headers(HashOrNumber::Number(0), head + 1, 0, false)
}

/// Every adjacent canonical pair links by parent hash and number.
pub fn assert_linked(headers: &[BlockHeader]) {
    for pair in headers.windows(2) {
        assert_eq!(pair[1].number, pair[0].number + 1);
        assert_eq!(
            pair[1].parent_hash,
            pair[0].hash(),
            "block {} does not link to its parent",
            pair[1].number
        );
    }
}

/// Poll `condition` every 10ms for up to five seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
