//! Reference consensus engine: structural header rules and a static reward.

use crate::domain::{ConsensusError, WorldState};
use crate::ports::{ConsensusEngine, EngineDescriptor, EngineKind, ThreadedMiner};
use shared_types::{Address, BlockHeader, U256};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Maximum header extra data.
pub const MAX_EXTRA_DATA_SIZE: usize = 32;

/// Smallest allowed block gas limit.
pub const MIN_GAS_LIMIT: u64 = 5_000;

/// A block's gas limit may move by at most `parent / GAS_LIMIT_BOUND_DIVISOR`.
pub const GAS_LIMIT_BOUND_DIVISOR: u64 = 1_024;

/// Default block reward.
pub const DEFAULT_BLOCK_REWARD: u64 = 2_000_000_000;

/// Worker thread count of a proof-of-work engine.
#[derive(Debug, Default)]
pub struct MinerThreads(AtomicI32);

impl ThreadedMiner for MinerThreads {
    fn set_threads(&self, threads: i32) {
        self.0.store(threads, Ordering::Relaxed);
    }

    fn threads(&self) -> i32 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Stateless header rules plus a block and uncle reward.
///
/// Sealing is out of scope: `mix_digest` and `nonce` are not checked.
pub struct BasicEngine {
    kind: EngineKind,
    block_reward: U256,
    threads: Option<Arc<MinerThreads>>,
}

impl BasicEngine {
    pub fn new(kind: EngineKind, block_reward: U256) -> Self {
        let threads = match kind {
            EngineKind::ProofOfWork => Some(Arc::new(MinerThreads::default())),
            EngineKind::ProofOfAuthority => None,
        };
        Self {
            kind,
            block_reward,
            threads,
        }
    }

    pub fn proof_of_work() -> Self {
        Self::new(EngineKind::ProofOfWork, U256::from(DEFAULT_BLOCK_REWARD))
    }

    pub fn proof_of_authority() -> Self {
        Self::new(EngineKind::ProofOfAuthority, U256::zero())
    }

    pub fn block_reward(&self) -> U256 {
        self.block_reward
    }
}

impl ConsensusEngine for BasicEngine {
    fn verify_header(
        &self,
        header: &BlockHeader,
        parent: &BlockHeader,
    ) -> Result<(), ConsensusError> {
        if header.number != parent.number + 1 {
            return Err(ConsensusError::InvalidNumber {
                parent: parent.number,
                got: header.number,
            });
        }
        if header.timestamp <= parent.timestamp {
            return Err(ConsensusError::InvalidTimestamp {
                parent: parent.timestamp,
                got: header.timestamp,
            });
        }
        if header.extra_data.len() > MAX_EXTRA_DATA_SIZE {
            return Err(ConsensusError::ExtraDataTooLong {
                len: header.extra_data.len(),
                max: MAX_EXTRA_DATA_SIZE,
            });
        }
        if header.gas_used > header.gas_limit {
            return Err(ConsensusError::GasUsedExceedsLimit {
                used: header.gas_used,
                limit: header.gas_limit,
            });
        }
        let bound = parent.gas_limit / GAS_LIMIT_BOUND_DIVISOR;
        if header.gas_limit < MIN_GAS_LIMIT || header.gas_limit.abs_diff(parent.gas_limit) > bound {
            return Err(ConsensusError::InvalidGasLimit {
                parent: parent.gas_limit,
                got: header.gas_limit,
            });
        }
        if header.difficulty.is_zero() {
            return Err(ConsensusError::ZeroDifficulty);
        }
        Ok(())
    }

    fn finalize(
        &self,
        header: &BlockHeader,
        state: &mut WorldState,
        uncles: &[BlockHeader],
    ) -> Result<(), ConsensusError> {
        if self.block_reward.is_zero() {
            return Ok(());
        }
        // Uncles earn (uncle + 8 - block) / 8 of the reward, the author 1/32 per uncle.
        let mut author_reward = self.block_reward;
        for uncle in uncles {
            let depth = header.number.saturating_sub(uncle.number);
            let share = U256::from(8u64.saturating_sub(depth));
            let uncle_reward = self.block_reward * share / U256::from(8u64);
            if !state.add_balance(&uncle.coinbase, uncle_reward) {
                return Err(ConsensusError::RewardOverflow);
            }
            author_reward = author_reward
                .checked_add(self.block_reward / U256::from(32u64))
                .ok_or(ConsensusError::RewardOverflow)?;
        }
        if !state.add_balance(&header.coinbase, author_reward) {
            return Err(ConsensusError::RewardOverflow);
        }
        Ok(())
    }

    fn author(&self, header: &BlockHeader) -> Result<Address, ConsensusError> {
        Ok(header.coinbase)
    }

    fn descriptor(&self) -> EngineDescriptor {
        EngineDescriptor {
            kind: self.kind,
            threaded: self
                .threads
                .clone()
                .map(|t| t as Arc<dyn ThreadedMiner>),
        }
    }
}
