//! # Outbound Ports
//!
//! Chain reads the pool needs to validate against the head.

use mc_03_blockchain::WorldState;
use shared_types::{Block, BlockHeader, Hash};

/// Read access to the chain.
pub trait PoolChain: Send + Sync {
    /// Header of the current canonical head.
    fn current_header(&self) -> BlockHeader;

    /// Block by hash, canonical or not.
    fn get_block(&self, hash: &Hash) -> Option<Block>;

    /// State for a root, `None` if not fully stored.
    fn state_at(&self, root: &Hash) -> Option<WorldState>;
}
