//! # Driven Ports (Outbound SPI)
//!
//! The connection a peer writes to. The transport (in-memory pipe or TCP)
//! provides the implementation.

use shared_types::protocol::{DisconnectReason, Message};
use thiserror::Error;

/// Write side of a peer connection.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`: the distributor, gossip loops and the
/// peer's own task all send through the same handle.
///
/// `send` must not block. Transports queue the message for a writer task.
pub trait PeerConnection: Send + Sync {
    /// Queue a message for the remote side.
    fn send(&self, message: Message) -> Result<(), ConnectionError>;

    /// Send `Disconnect(reason)` if possible and close the connection.
    fn disconnect(&self, reason: DisconnectReason);
}

/// Errors from connection writes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// The connection is closed.
    #[error("connection closed")]
    Closed,

    /// The outbound queue is full.
    #[error("outbound queue full")]
    Backpressure,
}
