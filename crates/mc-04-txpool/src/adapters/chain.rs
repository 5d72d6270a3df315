//! `PoolChain` over the blockchain service.

use crate::ports::PoolChain;
use mc_03_blockchain::{BlockChain, WorldState};
use shared_types::{Block, BlockHeader, Hash};
use tracing::debug;

impl PoolChain for BlockChain {
    fn current_header(&self) -> BlockHeader {
        BlockChain::current_header(self)
    }

    fn get_block(&self, hash: &Hash) -> Option<Block> {
        BlockChain::get_block(self, hash)
    }

    fn state_at(&self, root: &Hash) -> Option<WorldState> {
        BlockChain::state_at(self, root)
            .map_err(|e| debug!(root = %hex::encode(root), error = %e, "Pool state unavailable"))
            .ok()
    }
}
