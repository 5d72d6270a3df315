//! Distributor errors.

use super::request::RequestKind;
use shared_types::PeerId;
use thiserror::Error;

/// Why a fetch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DistributorError {
    /// No registered peer could serve the request within the wait bound.
    #[error("no peer can serve the request")]
    NoPeers,

    /// The request timed out on a pinned peer or ran out of attempts.
    #[error("request timed out")]
    Timeout,

    /// The caller's cancellation token fired.
    #[error("request cancelled")]
    Cancelled,

    /// The pinned target peer went away.
    #[error("target peer dropped")]
    PeerDropped,

    /// The distributor or the peer set was closed.
    #[error("distributor closed")]
    Closed,
}

/// Why a response was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// No in-flight request has this id: it was never sent, already answered,
    /// cancelled or timed out.
    #[error("unknown request id")]
    UnknownRequest,

    /// The request was sent to another peer.
    #[error("response from {got}, request was sent to {expected}")]
    PeerMismatch { expected: PeerId, got: PeerId },

    /// The response does not answer the request's kind.
    #[error("expected {expected} response, got {got}")]
    KindMismatch { expected: RequestKind, got: RequestKind },
}
