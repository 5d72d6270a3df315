//! Domain errors for the peer set.

use thiserror::Error;

/// Errors that can occur during peer set operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PeerSetError {
    /// The set was closed; no further registrations are accepted.
    #[error("peer set closed")]
    Closed,

    /// A peer or extension with this id is already registered or pending.
    #[error("peer already registered")]
    AlreadyRegistered,

    /// No peer with this id is registered.
    #[error("peer not registered")]
    NotRegistered,

    /// The extension connection does not run the base protocol.
    #[error("extension connection without base protocol")]
    ExtensionWithoutBase,
}
