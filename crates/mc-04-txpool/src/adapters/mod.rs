//! Adapters binding the pool to the chain.

pub mod chain;
