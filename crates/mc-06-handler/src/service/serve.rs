//! Answering data requests from the local chain.
//!
//! Every reply is capped by count; node data is also capped by size. Hashes
//! the chain doesn't have are skipped, and the reply may be empty.

use super::Handler;
use mc_01_peer_set::Peer;
use shared_types::{Hash, HashOrNumber};
use tracing::{debug, trace};

/// Byte budget for a node-data reply.
pub const SOFT_RESPONSE_LIMIT: usize = 2 * 1024 * 1024;

impl Handler {
    pub(crate) fn serve_headers(
        &self,
        peer: &Peer,
        request_id: u64,
        origin: HashOrNumber,
        amount: u64,
        skip: u64,
        reverse: bool,
    ) {
        let amount = amount.min(self.config.max_headers_serve);
        let headers = self.chain.get_headers(origin, amount, skip, reverse);
        trace!(peer = %peer.id(), request_id, served = headers.len(), "Serving headers");
        if let Err(e) = peer.send_block_headers(request_id, headers) {
            debug!(peer = %peer.id(), error = %e, "Failed to send headers");
        }
    }

    pub(crate) fn serve_bodies(&self, peer: &Peer, request_id: u64, hashes: &[Hash]) {
        let bodies: Vec<_> = hashes
            .iter()
            .take(self.config.max_bodies_serve)
            .filter_map(|hash| self.chain.get_body(hash))
            .collect();
        trace!(peer = %peer.id(), request_id, served = bodies.len(), "Serving bodies");
        if let Err(e) = peer.send_block_bodies(request_id, bodies) {
            debug!(peer = %peer.id(), error = %e, "Failed to send bodies");
        }
    }

    pub(crate) fn serve_receipts(&self, peer: &Peer, request_id: u64, hashes: &[Hash]) {
        let receipts: Vec<_> = hashes
            .iter()
            .take(self.config.max_receipts_serve)
            .filter_map(|hash| self.chain.get_receipts(hash))
            .collect();
        trace!(peer = %peer.id(), request_id, served = receipts.len(), "Serving receipts");
        if let Err(e) = peer.send_receipts(request_id, receipts) {
            debug!(peer = %peer.id(), error = %e, "Failed to send receipts");
        }
    }

    pub(crate) fn serve_node_data(&self, peer: &Peer, request_id: u64, hashes: &[Hash]) {
        let mut nodes = Vec::new();
        let mut bytes = 0;
        for hash in hashes.iter().take(self.config.max_node_data_serve) {
            if bytes >= SOFT_RESPONSE_LIMIT {
                break;
            }
            if let Some(node) = self.chain.get_state_node(hash) {
                bytes += node.len();
                nodes.push(node);
            }
        }
        trace!(peer = %peer.id(), request_id, served = nodes.len(), bytes, "Serving node data");
        if let Err(e) = peer.send_node_data(request_id, nodes) {
            debug!(peer = %peer.id(), error = %e, "Failed to send node data");
        }
    }
}
