//! # Domain Layer
//!
//! - `world_state` - mutable account state for one block's execution
//! - `genesis` - genesis configuration and block derivation
//! - `schema` - storage keys and record codec
//! - `errors` - every error the chain raises

pub mod errors;
pub mod genesis;
pub mod schema;
pub mod world_state;

pub use errors::{ChainError, ConsensusError, ExecutionError, InsertError, KvError};
pub use genesis::{Genesis, GenesisAccount};
pub use schema::TxLookup;
pub use world_state::WorldState;
