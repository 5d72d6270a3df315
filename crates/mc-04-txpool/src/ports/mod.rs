//! Ports the pool depends on.

pub mod outbound;

pub use outbound::PoolChain;
