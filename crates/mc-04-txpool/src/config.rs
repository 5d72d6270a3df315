//! # Pool Configuration
//!
//! Defaults mirror the limits public networks run with.

use serde::{Deserialize, Serialize};
use shared_types::Address;

/// Transaction pool limits and pricing rules.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxPoolConfig {
    /// Senders treated as local in addition to `add_local` submitters.
    #[serde(default)]
    pub locals: Vec<Address>,

    /// Minimum gas price for remote transactions.
    pub price_limit: u64,

    /// Percent a replacement must raise the gas price by.
    pub price_bump: u64,

    /// Executable transactions guaranteed per sender.
    pub account_slots: usize,

    /// Executable remote transactions across all senders.
    pub global_slots: usize,

    /// Non-executable transactions per sender.
    pub account_queue: usize,

    /// Non-executable remote transactions across all senders.
    pub global_queue: usize,

    /// Hard cap on local transactions, which are never price-evicted.
    pub local_capacity: usize,

    /// Largest accepted transaction in bytes.
    pub max_tx_size: usize,

    /// Deepest reorg whose discarded transactions are re-injected.
    pub max_reorg_depth: u64,
}

impl Default for TxPoolConfig {
    fn default() -> Self {
        Self {
            locals: Vec::new(),
            price_limit: 1,
            price_bump: 10,
            account_slots: 16,
            global_slots: 4096,
            account_queue: 64,
            global_queue: 1024,
            local_capacity: 4096,
            max_tx_size: 32 * 1024,
            max_reorg_depth: 64,
        }
    }
}

impl TxPoolConfig {
    /// Small limits so capacity paths are reachable in tests.
    pub fn for_testing() -> Self {
        Self {
            account_slots: 4,
            global_slots: 8,
            account_queue: 2,
            global_queue: 2,
            local_capacity: 12,
            ..Self::default()
        }
    }

    /// Remote transactions the pool holds before evicting.
    pub fn global_capacity(&self) -> usize {
        self.global_slots + self.global_queue
    }

    /// Transactions one remote sender may hold.
    pub fn account_capacity(&self) -> usize {
        self.account_slots + self.account_queue
    }
}
