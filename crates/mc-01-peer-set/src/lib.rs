//! # Peer Set
//!
//! Registry of connected peers for the sync pipeline.
//!
//! ## Responsibilities
//!
//! | Concern | Operation |
//! |---------|-----------|
//! | Membership | `register`, `unregister`, `close` |
//! | Snap extension handoff | `register_extension`, `wait_for_extension` |
//! | Sync target selection | `best_peer` (highest TD, lowest id on ties) |
//! | Gossip selection | `peers_lacking_block`, `peers_lacking_tx` |
//!
//! ## Extension Handoff
//!
//! ```text
//!  base connection                     snap connection
//!        │                                    │
//!  wait_for_extension ──┐        ┌── register_extension
//!        │              ▼        ▼            │
//!        │         ┌─────────────────┐        │
//!        │         │ waiters/pending │        │
//!        │         └─────────────────┘        │
//!        ▼  (oneshot)                          │
//!  register(peer, Some(ext))                   │
//! ```
//!
//! Whichever side arrives first parks in the table; the other side completes
//! the handoff. Closing the set fails every waiter with `Closed`.

pub mod domain;
pub mod ports;

/// Recording connection and peer builders.
/// Requires feature: `test-utils`
#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use domain::{
    ExtensionPeer, Peer, PeerInfo, PeerSet, PeerSetError, MAX_KNOWN_BLOCKS, MAX_KNOWN_TXS,
};
pub use ports::{ConnectionError, PeerConnection};
