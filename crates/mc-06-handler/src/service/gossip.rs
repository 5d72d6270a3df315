//! Block and transaction propagation.
//!
//! | Inbound | Action |
//! |---------|--------|
//! | `NewBlockHashes` | Mark known, advance the peer's head hint, nudge the syncer |
//! | `NewBlock` | Verify against the parent, propagate, import, announce |
//! | `Transactions` | Mark known, add to the pool once synced |
//!
//! A new block goes in full to the square root of the peers lacking it and
//! as a hash announcement to the others once imported.

use super::Handler;
use mc_01_peer_set::Peer;
use rand::seq::SliceRandom;
use shared_bus::{ChainEvent, Subscription, SubscriptionError};
use shared_types::protocol::{BlockAnnouncement, DisconnectReason};
use shared_types::{Block, PeerId, Transaction, U256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

impl Handler {
    // =========================================================================
    // INBOUND
    // =========================================================================

    pub(crate) fn handle_block_announcements(
        &self,
        peer: &Peer,
        announcements: Vec<BlockAnnouncement>,
    ) {
        let mut unknown = 0;
        for ann in &announcements {
            peer.mark_block(ann.hash);
            if !self.chain.has_block(&ann.hash) {
                unknown += 1;
            }
        }
        if let Some(highest) = announcements.iter().max_by_key(|ann| ann.number) {
            let local = self.chain.current_header().number;
            if highest.number > local {
                peer.set_head(highest.hash, peer.td());
            }
        }
        if unknown > 0 {
            trace!(peer = %peer.id(), unknown, "Unknown blocks announced");
            self.request_sync();
        }
    }

    pub(crate) fn handle_new_block(&self, peer: &Peer, block: Block, td: U256) {
        let hash = block.hash();
        peer.mark_block(hash);

        // The peer holds at least the parent.
        let parent_td = td.saturating_sub(block.header.difficulty);
        if parent_td > peer.td() {
            peer.set_head(block.parent_hash(), parent_td);
        }
        if td > peer.td() {
            peer.set_head(hash, td);
        }

        if self.chain.has_block(&hash) {
            return;
        }
        if self.downloader.is_syncing() {
            trace!(number = block.number(), "Syncing, leaving propagated block to the downloader");
            return;
        }
        let Some(parent) = self.chain.get_header(&block.parent_hash()) else {
            debug!(peer = %peer.id(), number = block.number(), "Propagated block has unknown parent");
            self.request_sync();
            return;
        };
        if !self.chain.has_state(&parent.state_root) {
            self.request_sync();
            return;
        }
        let stored_td = self.chain.get_td(&block.parent_hash()).unwrap_or_default();
        if stored_td.checked_add(block.header.difficulty).is_none() {
            warn!(peer = %peer.id(), number = block.number(), "Propagated block overflows total difficulty");
            peer.disconnect(DisconnectReason::UselessPeer);
            return;
        }
        if let Err(e) = self.chain.engine().verify_header(&block.header, &parent) {
            warn!(peer = %peer.id(), number = block.number(), error = %e, "Invalid propagated block");
            peer.disconnect(DisconnectReason::UselessPeer);
            return;
        }

        self.broadcast_block(&block, true);
        match self.chain.insert_chain(std::slice::from_ref(&block)) {
            Ok(_) => {
                if self.downloader.fast_sync_gate().disable() {
                    info!("Imported a propagated block, fast sync disabled");
                }
                self.enable_transactions();
                self.broadcast_block(&block, false);
            }
            Err(e) => {
                debug!(peer = %peer.id(), number = block.number(), error = %e, "Propagated block import failed");
            }
        }
    }

    pub(crate) fn handle_transactions(&self, peer: &Peer, txs: Vec<Transaction>) {
        for tx in &txs {
            peer.mark_transaction(tx.hash());
        }
        if !self.accepts_transactions() {
            trace!(peer = %peer.id(), count = txs.len(), "Not synced, dropping transactions");
            return;
        }
        let received = txs.len();
        let rejected = self
            .pool
            .add_remotes(txs)
            .iter()
            .filter(|result| result.is_err())
            .count();
        trace!(peer = %peer.id(), received, rejected, "Remote transactions");
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    /// Send each transaction to every peer that doesn't know it, one message
    /// per peer.
    pub fn broadcast_transactions(&self, txs: &[Transaction]) {
        let mut batches: HashMap<PeerId, (Arc<Peer>, Vec<Transaction>)> = HashMap::new();
        for tx in txs {
            for peer in self.peers.peers_lacking_tx(&tx.hash()) {
                batches
                    .entry(peer.id())
                    .or_insert_with(|| (peer.clone(), Vec::new()))
                    .1
                    .push(tx.clone());
            }
        }
        for (peer, batch) in batches.into_values() {
            let count = batch.len();
            if let Err(e) = peer.send_transactions(batch) {
                debug!(peer = %peer.id(), count, error = %e, "Transaction broadcast failed");
            }
        }
        trace!(count = txs.len(), "Broadcast transactions");
    }

    /// With `propagate`, send the full block to the square root of the peers
    /// lacking it. Otherwise announce its hash to every peer lacking it, if
    /// the block is stored.
    pub fn broadcast_block(&self, block: &Block, propagate: bool) {
        let hash = block.hash();
        let mut peers = self.peers.peers_lacking_block(&hash);

        if propagate {
            let Some(parent_td) = self.chain.get_td(&block.parent_hash()) else {
                warn!(number = block.number(), "Propagating block with unknown parent");
                return;
            };
            let td = parent_td.saturating_add(block.header.difficulty);
            peers.shuffle(&mut rand::thread_rng());
            let count = (peers.len() as f64).sqrt() as usize;
            for peer in peers.iter().take(count) {
                if let Err(e) = peer.send_new_block(block.clone(), td) {
                    debug!(peer = %peer.id(), error = %e, "Block propagation failed");
                }
            }
            trace!(number = block.number(), recipients = count, "Propagated block");
            return;
        }

        if !self.chain.has_block(&hash) {
            return;
        }
        let announcement = BlockAnnouncement {
            hash,
            number: block.number(),
        };
        for peer in &peers {
            if let Err(e) = peer.send_new_block_hashes(vec![announcement]) {
                debug!(peer = %peer.id(), error = %e, "Block announcement failed");
            }
        }
        trace!(number = block.number(), recipients = peers.len(), "Announced block");
    }

    /// Hand a new peer everything executable in the pool.
    pub(crate) fn send_pending_transactions(&self, peer: &Peer) {
        let txs: Vec<_> = self.pool.pending().into_values().flatten().collect();
        if txs.is_empty() {
            return;
        }
        let count = txs.len();
        if let Err(e) = peer.send_transactions(txs) {
            debug!(peer = %peer.id(), count, error = %e, "Initial transaction sync failed");
        }
    }

    /// Broadcast transactions as the pool promotes them, until cancelled or
    /// the bus closes.
    pub async fn run_tx_broadcast(
        self: Arc<Self>,
        mut pending: Subscription,
        cancel: CancellationToken,
    ) {
        info!("Transaction broadcast loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = pending.recv() => match event {
                    Ok(ChainEvent::NewPendingTransactions(txs)) => self.broadcast_transactions(&txs),
                    Ok(_) => {}
                    Err(SubscriptionError::Lagged(missed)) => {
                        warn!(missed, "Transaction broadcast lagged behind the pool");
                    }
                    Err(SubscriptionError::Closed) => break,
                },
            }
        }
        pending.unsubscribe();
        info!("Transaction broadcast loop stopped");
    }
}
