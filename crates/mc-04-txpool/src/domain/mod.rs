//! Pool domain: admission errors, price ordering and the pending set.

pub mod errors;
pub mod pending_set;
pub mod priced;

pub use errors::PoolError;
pub use pending_set::{PendingSet, PooledTx};
pub use priced::PricedTransaction;
