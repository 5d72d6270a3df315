//! # Driving Port (Inbound)
//!
//! The read side of a connection. The write side is
//! [`mc_01_peer_set::PeerConnection`].

use async_trait::async_trait;
use shared_types::protocol::Message;
use shared_types::ProtocolError;

/// Messages arriving from the remote side, in order.
#[async_trait]
pub trait MessageSource: Send {
    /// Next message. `None` once the connection is closed from either side.
    async fn recv(&mut self) -> Option<Result<Message, ProtocolError>>;
}
