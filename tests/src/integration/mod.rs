//! Cross-crate scenarios. Each module holds its tests in a `tests` submodule.

pub mod chain_sync;
pub mod fork_choice;
pub mod peer_faults;
pub mod runtime;
pub mod tx_gossip;
