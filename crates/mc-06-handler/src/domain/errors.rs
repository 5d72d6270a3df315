//! # Handler Errors
//!
//! Every error that ends a connection maps to the `DisconnectReason` sent to
//! the remote side.

use mc_01_peer_set::PeerSetError;
use shared_types::protocol::DisconnectReason;
use shared_types::{Hash, ProtocolError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("unexpected {0} message")]
    UnexpectedMessage(&'static str),

    #[error("network mismatch: ours {ours}, theirs {theirs}")]
    NetworkMismatch { ours: u64, theirs: u64 },

    #[error("genesis mismatch: theirs {}", hex::encode(.0))]
    GenesisMismatch(Hash),

    #[error("unsupported protocol version {0}")]
    IncompatibleVersion(u32),

    #[error("too many peers")]
    TooManyPeers,

    #[error("connection to self")]
    SelfConnection,

    #[error("peer set: {0}")]
    PeerSet(#[from] PeerSetError),

    #[error("protocol: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("remote disconnected: {0:?}")]
    RemoteDisconnect(DisconnectReason),

    #[error("transport: {0}")]
    Transport(String),

    #[error("connection closed")]
    Closed,
}

impl HandlerError {
    /// Reason to send before closing, if the remote should be told.
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        match self {
            HandlerError::HandshakeTimeout => Some(DisconnectReason::Timeout),
            HandlerError::UnexpectedMessage(_) | HandlerError::Protocol(_) => {
                Some(DisconnectReason::ProtocolError)
            }
            HandlerError::NetworkMismatch { .. } => Some(DisconnectReason::NetworkMismatch),
            HandlerError::GenesisMismatch(_) => Some(DisconnectReason::GenesisMismatch),
            HandlerError::IncompatibleVersion(_) => Some(DisconnectReason::IncompatibleVersion),
            HandlerError::TooManyPeers => Some(DisconnectReason::TooManyPeers),
            HandlerError::SelfConnection => Some(DisconnectReason::UselessPeer),
            HandlerError::PeerSet(PeerSetError::AlreadyRegistered) => {
                Some(DisconnectReason::AlreadyConnected)
            }
            HandlerError::PeerSet(_) => Some(DisconnectReason::ClientQuitting),
            HandlerError::RemoteDisconnect(_)
            | HandlerError::Transport(_)
            | HandlerError::Closed => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasons() {
        assert_eq!(
            HandlerError::NetworkMismatch { ours: 1, theirs: 2 }.disconnect_reason(),
            Some(DisconnectReason::NetworkMismatch)
        );
        assert_eq!(
            HandlerError::PeerSet(PeerSetError::AlreadyRegistered).disconnect_reason(),
            Some(DisconnectReason::AlreadyConnected)
        );
        assert_eq!(HandlerError::Closed.disconnect_reason(), None);
    }
}
