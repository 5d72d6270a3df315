//! # Chain Maker
//!
//! Builds valid blocks on top of a parent for tests. Each generated block is
//! executed and finalized with the given engines so its roots match what
//! `BlockChain::insert_chain` recomputes.
//!
//! ```ignore
//! let maker = ChainMaker::new(engine, executor);
//! let blocks = maker.generate(&genesis, &genesis_state, 5, |i, gen| {
//!     gen.set_coinbase([i as u8; 20]);
//! })?;
//! ```

use crate::domain::{ChainError, ExecutionError, WorldState};
use crate::ports::{BlockContext, ConsensusEngine, ExecutionEngine, TxContext};
use shared_types::{
    receipts_root, transactions_root, uncles_hash, Address, Block, BlockHeader, Receipt,
    Transaction, U256,
};
use std::sync::Arc;

/// Default difficulty of generated blocks.
pub const DEFAULT_DIFFICULTY: u64 = 1_000;

/// Seconds between generated blocks.
pub const BLOCK_INTERVAL: u64 = 10;

/// Builder for one block in progress.
pub struct BlockGen {
    index: usize,
    header: BlockHeader,
    state: WorldState,
    transactions: Vec<Transaction>,
    receipts: Vec<Receipt>,
    uncles: Vec<BlockHeader>,
    executor: Arc<dyn ExecutionEngine>,
}

impl BlockGen {
    /// Position of this block in the generated run.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    /// Set the author. Call before `add_tx`, fees go to the coinbase at the time.
    pub fn set_coinbase(&mut self, coinbase: Address) {
        self.header.coinbase = coinbase;
    }

    pub fn set_extra(&mut self, extra: Vec<u8>) {
        self.header.extra_data = extra;
    }

    pub fn set_difficulty(&mut self, difficulty: U256) {
        self.header.difficulty = difficulty;
    }

    pub fn set_timestamp(&mut self, timestamp: u64) {
        self.header.timestamp = timestamp;
    }

    /// Execute `tx` on the block state and include it.
    pub fn add_tx(&mut self, tx: Transaction) -> Result<(), ExecutionError> {
        let ctx = BlockContext {
            number: self.header.number,
            coinbase: self.header.coinbase,
            timestamp: self.header.timestamp,
            gas_limit: self.header.gas_limit,
            difficulty: self.header.difficulty,
        };
        let tx_ctx = TxContext {
            index: self.transactions.len() as u32,
            hash: tx.hash(),
            gas_used_before: self.header.gas_used,
        };
        let mut scratch = self.state.clone();
        let receipt = self
            .executor
            .apply_transaction(&ctx, &tx_ctx, &mut scratch, &tx)?;
        self.state = scratch;
        self.header.gas_used = receipt.cumulative_gas_used;
        self.receipts.push(receipt);
        self.transactions.push(tx);
        Ok(())
    }

    pub fn add_uncle(&mut self, uncle: BlockHeader) {
        self.uncles.push(uncle);
    }

    /// State after the transactions added so far.
    pub fn state(&self) -> &WorldState {
        &self.state
    }
}

/// Generates chains with fixed engines.
pub struct ChainMaker {
    engine: Arc<dyn ConsensusEngine>,
    executor: Arc<dyn ExecutionEngine>,
}

impl ChainMaker {
    pub fn new(engine: Arc<dyn ConsensusEngine>, executor: Arc<dyn ExecutionEngine>) -> Self {
        Self { engine, executor }
    }

    /// Generate `n` blocks on top of `parent`, whose post-state is `parent_state`.
    pub fn generate<F>(
        &self,
        parent: &Block,
        parent_state: &WorldState,
        n: usize,
        gen: F,
    ) -> Result<Vec<Block>, ChainError>
    where
        F: FnMut(usize, &mut BlockGen),
    {
        Ok(self
            .generate_with_receipts(parent, parent_state, n, gen)?
            .into_iter()
            .map(|(block, _)| block)
            .collect())
    }

    /// Like `generate`, also returning each block's receipts.
    pub fn generate_with_receipts<F>(
        &self,
        parent: &Block,
        parent_state: &WorldState,
        n: usize,
        mut gen: F,
    ) -> Result<Vec<(Block, Vec<Receipt>)>, ChainError>
    where
        F: FnMut(usize, &mut BlockGen),
    {
        let mut out = Vec::with_capacity(n);
        let mut parent_header = parent.header.clone();
        let mut state = parent_state.clone();

        for index in 0..n {
            let mut block_gen = BlockGen {
                index,
                header: BlockHeader {
                    parent_hash: parent_header.hash(),
                    number: parent_header.number + 1,
                    coinbase: [0u8; 20],
                    difficulty: U256::from(DEFAULT_DIFFICULTY),
                    gas_limit: parent_header.gas_limit,
                    timestamp: parent_header.timestamp + BLOCK_INTERVAL,
                    ..Default::default()
                },
                state,
                transactions: Vec::new(),
                receipts: Vec::new(),
                uncles: Vec::new(),
                executor: Arc::clone(&self.executor),
            };
            gen(index, &mut block_gen);

            let BlockGen {
                mut header,
                state: mut block_state,
                transactions,
                receipts,
                uncles,
                ..
            } = block_gen;

            self.engine
                .finalize(&header, &mut block_state, &uncles)?;
            header.state_root = block_state.root();
            header.transactions_root = transactions_root(&transactions);
            header.receipts_root = receipts_root(&receipts);
            header.uncles_hash = uncles_hash(&uncles);

            parent_header = header.clone();
            state = block_state;
            out.push((
                Block {
                    header,
                    transactions,
                    uncles,
                },
                receipts,
            ));
        }
        Ok(out)
    }
}
