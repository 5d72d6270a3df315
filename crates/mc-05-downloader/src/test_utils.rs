//! Test utilities for the downloader.
//!
//! Enable with the `test-utils` feature flag. `ServingConnection` answers
//! requests from a `BlockChain` and routes the replies back through a
//! `RequestDistributor`, so a downloader can sync against a local chain.

use mc_01_peer_set::{ConnectionError, Peer, PeerConnection};
use mc_02_request_distributor::{RequestDistributor, Response};
use mc_03_blockchain::BlockChain;
use parking_lot::Mutex;
use shared_types::protocol::{Capability, DisconnectReason, Message, VERSION_65};
use shared_types::{PeerId, Transaction};
use std::sync::{Arc, Weak};

/// Misbehavior injected into served replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fault {
    #[default]
    None,
    /// Bodies carry an extra transaction, so their roots mismatch.
    CorruptBodies,
    /// Requests are accepted but never answered.
    Silent,
    /// The header at this number is served with oversized extra data.
    TamperHeader(u64),
}

/// A peer connection backed by a chain.
pub struct ServingConnection {
    id: PeerId,
    chain: Arc<BlockChain>,
    distributor: Weak<RequestDistributor>,
    fault: Mutex<Fault>,
    disconnected: Mutex<Option<DisconnectReason>>,
}

impl ServingConnection {
    pub fn new(id: PeerId, chain: Arc<BlockChain>, distributor: &Arc<RequestDistributor>) -> Self {
        Self {
            id,
            chain,
            distributor: Arc::downgrade(distributor),
            fault: Mutex::new(Fault::None),
            disconnected: Mutex::new(None),
        }
    }

    pub fn set_fault(&self, fault: Fault) {
        *self.fault.lock() = fault;
    }

    /// Reason of the last `disconnect` call, if any.
    pub fn disconnect_reason(&self) -> Option<DisconnectReason> {
        *self.disconnected.lock()
    }

    fn respond(&self, message: Message, fault: Fault) -> Option<(u64, Response)> {
        match message {
            Message::GetBlockHeaders {
                request_id,
                origin,
                amount,
                skip,
                reverse,
            } => {
                let mut headers = self.chain.get_headers(origin, amount, skip, reverse);
                if let Fault::TamperHeader(number) = fault {
                    for header in headers.iter_mut().filter(|h| h.number == number) {
                        header.extra_data = vec![0xff; 33];
                    }
                }
                Some((request_id, Response::Headers(headers)))
            }
            Message::GetBlockBodies { request_id, hashes } => {
                let mut bodies: Vec<_> = hashes.iter().filter_map(|h| self.chain.get_body(h)).collect();
                if fault == Fault::CorruptBodies {
                    for body in &mut bodies {
                        body.transactions.push(Transaction::default());
                    }
                }
                Some((request_id, Response::Bodies(bodies)))
            }
            Message::GetReceipts { request_id, hashes } => {
                let receipts = hashes
                    .iter()
                    .filter_map(|h| self.chain.get_receipts(h))
                    .collect();
                Some((request_id, Response::Receipts(receipts)))
            }
            Message::GetNodeData { request_id, hashes } => {
                let nodes = hashes
                    .iter()
                    .filter_map(|h| self.chain.get_state_node(h))
                    .collect();
                Some((request_id, Response::NodeData(nodes)))
            }
            _ => None,
        }
    }
}

impl PeerConnection for ServingConnection {
    fn send(&self, message: Message) -> Result<(), ConnectionError> {
        if self.disconnected.lock().is_some() {
            return Err(ConnectionError::Closed);
        }
        let fault = *self.fault.lock();
        if fault == Fault::Silent {
            return Ok(());
        }
        let Some((request_id, response)) = self.respond(message, fault) else {
            return Ok(());
        };
        // Replies arrive asynchronously, as from a real connection.
        let distributor = self.distributor.clone();
        let peer = self.id;
        tokio::spawn(async move {
            if let Some(distributor) = distributor.upgrade() {
                let _ = distributor.deliver(peer, request_id, response);
            }
        });
        Ok(())
    }

    fn disconnect(&self, reason: DisconnectReason) {
        *self.disconnected.lock() = Some(reason);
    }
}

/// A version 65 peer with id `PeerId::from_byte(tag)` serving `chain`, with
/// `chain`'s head and total difficulty.
pub fn serving_peer(
    tag: u8,
    chain: &Arc<BlockChain>,
    distributor: &Arc<RequestDistributor>,
) -> (Arc<Peer>, Arc<ServingConnection>) {
    let id = PeerId::from_byte(tag);
    let conn = Arc::new(ServingConnection::new(id, Arc::clone(chain), distributor));
    let peer = Peer::new(
        id,
        VERSION_65,
        vec![Capability::base(VERSION_65)],
        chain.current_block().hash(),
        chain.current_td(),
        conn.clone(),
    );
    (Arc::new(peer), conn)
}
