//! # Domain Layer
//!
//! - `peer` - connected peer state, known-hash caches and send helpers
//! - `peer_set` - the registry and extension handoff
//! - `errors` - `PeerSetError`

pub mod errors;
pub mod peer;
pub mod peer_set;

pub use errors::PeerSetError;
pub use peer::{ExtensionPeer, Peer, PeerInfo, MAX_KNOWN_BLOCKS, MAX_KNOWN_TXS};
pub use peer_set::PeerSet;
