//! # Sync Errors
//!
//! Peer faults (`InvalidHeaders`, `RetrievalFailed`) end the attempt and
//! penalize the peer; local failures (`Commit`) end it without blame.

use mc_02_request_distributor::{DistributorError, RequestKind};
use mc_03_blockchain::{ChainError, InsertError};
use shared_types::PeerId;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Another attempt is running.
    #[error("sync already in progress")]
    Busy,

    #[error("peer {0} is not registered")]
    UnknownPeer(PeerId),

    /// The remote chain shares no ancestor with ours, starting at genesis.
    #[error("no common ancestor: {0}")]
    InvalidAncestor(String),

    /// The target peer delivered a header chain that does not verify.
    #[error("invalid headers from {peer} at {number}: {reason}")]
    InvalidHeaders {
        peer: PeerId,
        number: u64,
        reason: String,
    },

    /// A chunk could not be retrieved from any peer within the retry budget.
    #[error("{kind} retrieval failed from block {from} after {attempts} attempts")]
    RetrievalFailed {
        kind: RequestKind,
        from: u64,
        attempts: u32,
    },

    /// A delivered state node could not be decoded or stored.
    #[error("state sync failed: {0}")]
    StateSync(String),

    /// Block import rejected a downloaded block.
    #[error("commit failed: {0}")]
    Commit(#[from] InsertError),

    /// Fast-sync storage or head commit failed.
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("request failed: {0}")]
    Fetch(DistributorError),

    #[error("sync cancelled")]
    Cancelled,
}

impl From<DistributorError> for SyncError {
    fn from(e: DistributorError) -> Self {
        match e {
            DistributorError::Cancelled => SyncError::Cancelled,
            other => SyncError::Fetch(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distributor_cancel_maps_to_cancelled() {
        assert_eq!(
            SyncError::from(DistributorError::Cancelled),
            SyncError::Cancelled
        );
        assert_eq!(
            SyncError::from(DistributorError::NoPeers),
            SyncError::Fetch(DistributorError::NoPeers)
        );
    }
}
