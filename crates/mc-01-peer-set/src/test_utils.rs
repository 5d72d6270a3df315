//! Test utilities for the peer set.
//!
//! Enable with the `test-utils` feature flag.
//!
//! # Example
//!
//! ```rust
//! use mc_01_peer_set::test_utils::test_peer;
//!
//! let (peer, conn) = test_peer(1, 100);
//! peer.request_bodies(7, vec![[0u8; 32]]).unwrap();
//! assert_eq!(conn.sent().len(), 1);
//! ```

use crate::domain::Peer;
use crate::ports::{ConnectionError, PeerConnection};
use parking_lot::Mutex;
use shared_types::protocol::{Capability, DisconnectReason, Message, VERSION_65};
use shared_types::{PeerId, U256};
use std::sync::Arc;

/// A connection that records every message instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingConnection {
    sent: Mutex<Vec<Message>>,
    disconnected: Mutex<Option<DisconnectReason>>,
}

impl RecordingConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages sent so far.
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    /// Drain the recorded messages.
    pub fn take_sent(&self) -> Vec<Message> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Reason of the last `disconnect` call, if any.
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        *self.disconnected.lock()
    }
}

impl PeerConnection for RecordingConnection {
    fn send(&self, message: Message) -> Result<(), ConnectionError> {
        if self.disconnected.lock().is_some() {
            return Err(ConnectionError::Closed);
        }
        self.sent.lock().push(message);
        Ok(())
    }

    fn disconnect(&self, reason: DisconnectReason) {
        *self.disconnected.lock() = Some(reason);
    }
}

/// A version 65 peer with id `PeerId::from_byte(tag)`, total difficulty `td`
/// and a recording connection.
pub fn test_peer(tag: u8, td: u64) -> (Arc<Peer>, Arc<RecordingConnection>) {
    test_peer_with(tag, td, VERSION_65, vec![Capability::base(VERSION_65)])
}

/// Like [`test_peer`] with an explicit version and capability list.
pub fn test_peer_with(
    tag: u8,
    td: u64,
    version: u32,
    capabilities: Vec<Capability>,
) -> (Arc<Peer>, Arc<RecordingConnection>) {
    let conn = Arc::new(RecordingConnection::new());
    let peer = Peer::new(
        PeerId::from_byte(tag),
        version,
        capabilities,
        [tag; 32],
        U256::from(td),
        conn.clone(),
    );
    (Arc::new(peer), conn)
}
