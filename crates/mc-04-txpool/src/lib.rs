//! # Transaction Pool
//!
//! Holds transactions waiting for inclusion, split per sender into an
//! executable run of nonces and a queue of future nonces.
//!
//! ## Admission
//!
//! Checks run in this order; the first failure is returned and the pool is
//! unchanged.
//!
//! | Check | Error |
//! |-------|-------|
//! | Encoded size above `max_tx_size` | `OversizedData` |
//! | Gas limit above the head block gas limit | `GasLimit` |
//! | Sender recovery | `InvalidSignature` |
//! | Remote price below `price_limit` | `Underpriced` |
//! | Nonce below the account nonce | `NonceTooLow` |
//! | `value + gas_limit * gas_price` above balance | `InsufficientFunds` |
//! | Gas limit below intrinsic gas | `IntrinsicGas` |
//! | Hash already pooled | `AlreadyKnown` |
//!
//! ## Capacity
//!
//! | Limit | On overflow |
//! |-------|-------------|
//! | Same sender and nonce | Replace if `price_bump`% higher, else `Underpriced` |
//! | `account_slots + account_queue` per remote sender | Evict the sender's cheapest queued tx, else `AccountLimitReached` |
//! | `global_slots + global_queue` remote txs | Evict the cheapest remote, else `Underpriced` |
//! | `local_capacity` local txs | `PoolFull` |
//!
//! ## Head Changes
//!
//! ```text
//! ChainHead ─→ reset(old, new)
//!                 │ old not parent of new
//!                 ├──────────────→ walk both branches to the fork point,
//!                 │                re-add txs only the old branch had
//!                 ▼
//!              drop stale / unaffordable ─→ demote after gaps ─→ promote
//!                 │
//!                 ▼
//!              NewPendingTransactions
//! ```

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod service;

pub use config::TxPoolConfig;
pub use domain::{PendingSet, PoolError, PooledTx, PricedTransaction};
pub use ports::PoolChain;
pub use service::{PoolStats, TxPool};
