//! The peer table.
//!
//! One `RwLock` guards every map. The only await point is the extension
//! waiter, and it runs after the lock is released.

use super::errors::PeerSetError;
use super::peer::{ExtensionPeer, Peer, PeerInfo};
use parking_lot::RwLock;
use shared_types::protocol::DisconnectReason;
use shared_types::{Hash, PeerId};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, info};

#[derive(Default)]
struct Table {
    peers: HashMap<PeerId, Arc<Peer>>,
    extensions: HashMap<PeerId, Arc<ExtensionPeer>>,
    /// Extension connections that arrived before their base peer asked.
    ext_pending: HashMap<PeerId, ExtensionPeer>,
    /// Base peers blocked in `wait_for_extension`.
    ext_waiters: HashMap<PeerId, oneshot::Sender<ExtensionPeer>>,
    closed: bool,
}

/// Registry of connected peers.
#[derive(Default)]
pub struct PeerSet {
    table: RwLock<Table>,
    generation: AtomicU64,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a peer, together with its extension if it runs one.
    ///
    /// The peer is visible to lookups as soon as this returns.
    pub fn register(
        &self,
        peer: Arc<Peer>,
        extension: Option<ExtensionPeer>,
    ) -> Result<(), PeerSetError> {
        let id = peer.id();
        {
            let mut table = self.table.write();
            if table.closed {
                return Err(PeerSetError::Closed);
            }
            if table.peers.contains_key(&id) {
                return Err(PeerSetError::AlreadyRegistered);
            }
            if let Some(ext) = extension {
                table.extensions.insert(id, Arc::new(ext));
            }
            table.peers.insert(id, peer);
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        debug!(peer = %id, "Peer registered");
        Ok(())
    }

    /// Remove a peer and its extension.
    pub fn unregister(&self, id: &PeerId) -> Result<(), PeerSetError> {
        {
            let mut table = self.table.write();
            if table.peers.remove(id).is_none() {
                return Err(PeerSetError::NotRegistered);
            }
            table.extensions.remove(id);
        }
        self.generation.fetch_add(1, Ordering::AcqRel);
        debug!(peer = %id, "Peer unregistered");
        Ok(())
    }

    /// Hand an extension connection to its base peer, or park it until the
    /// base peer asks for it.
    pub fn register_extension(&self, ext: ExtensionPeer) -> Result<(), PeerSetError> {
        if !ext.runs_base() {
            return Err(PeerSetError::ExtensionWithoutBase);
        }
        let id = ext.id;
        let mut table = self.table.write();
        if table.closed {
            return Err(PeerSetError::Closed);
        }
        if table.peers.contains_key(&id) || table.ext_pending.contains_key(&id) {
            return Err(PeerSetError::AlreadyRegistered);
        }
        if let Some(waiter) = table.ext_waiters.remove(&id) {
            match waiter.send(ext) {
                Ok(()) => return Ok(()),
                // The waiting task went away; keep the extension for a retry.
                Err(ext) => {
                    table.ext_pending.insert(id, ext);
                    return Ok(());
                }
            }
        }
        table.ext_pending.insert(id, ext);
        Ok(())
    }

    /// Wait for the extension connection of `peer`.
    ///
    /// Returns `Ok(None)` if the peer does not advertise the extension. There
    /// is no timeout here; callers bound the wait themselves.
    pub async fn wait_for_extension(
        &self,
        peer: &Peer,
    ) -> Result<Option<ExtensionPeer>, PeerSetError> {
        if !peer.supports_snap() {
            return Ok(None);
        }
        let id = peer.id();
        let rx = {
            let mut table = self.table.write();
            if table.closed {
                return Err(PeerSetError::Closed);
            }
            if table.peers.contains_key(&id) {
                return Err(PeerSetError::AlreadyRegistered);
            }
            if let Some(ext) = table.ext_pending.remove(&id) {
                return Ok(Some(ext));
            }
            if let Some(existing) = table.ext_waiters.get(&id) {
                if !existing.is_closed() {
                    return Err(PeerSetError::AlreadyRegistered);
                }
            }
            let (tx, rx) = oneshot::channel();
            table.ext_waiters.insert(id, tx);
            rx
        };
        // Sender dropped means the set was closed.
        rx.await.map(Some).map_err(|_| PeerSetError::Closed)
    }

    pub fn peer(&self, id: &PeerId) -> Option<Arc<Peer>> {
        self.table.read().peers.get(id).cloned()
    }

    pub fn extension(&self, id: &PeerId) -> Option<Arc<ExtensionPeer>> {
        self.table.read().extensions.get(id).cloned()
    }

    pub fn has_extension(&self, id: &PeerId) -> bool {
        self.table.read().extensions.contains_key(id)
    }

    /// All peers, ordered by id.
    pub fn peers(&self) -> Vec<Arc<Peer>> {
        let mut peers: Vec<_> = self.table.read().peers.values().cloned().collect();
        peers.sort_by_key(|p| p.id());
        peers
    }

    pub fn len(&self) -> usize {
        self.table.read().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of peers running the snap extension.
    pub fn extension_len(&self) -> usize {
        self.table.read().extensions.len()
    }

    /// Bumped on every register and unregister.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn peers_lacking_block(&self, hash: &Hash) -> Vec<Arc<Peer>> {
        let mut peers: Vec<_> = self
            .table
            .read()
            .peers
            .values()
            .filter(|p| !p.knows_block(hash))
            .cloned()
            .collect();
        peers.sort_by_key(|p| p.id());
        peers
    }

    pub fn peers_lacking_tx(&self, hash: &Hash) -> Vec<Arc<Peer>> {
        let mut peers: Vec<_> = self
            .table
            .read()
            .peers
            .values()
            .filter(|p| !p.knows_transaction(hash))
            .cloned()
            .collect();
        peers.sort_by_key(|p| p.id());
        peers
    }

    /// Peer with the highest total difficulty; ties go to the lowest id.
    pub fn best_peer(&self) -> Option<Arc<Peer>> {
        self.table
            .read()
            .peers
            .values()
            .max_by_key(|p| (p.td(), Reverse(p.id())))
            .cloned()
    }

    pub fn peer_infos(&self) -> Vec<PeerInfo> {
        let table = self.table.read();
        let mut infos: Vec<_> = table
            .peers
            .values()
            .map(|p| {
                let (head, td) = p.head();
                PeerInfo {
                    id: p.id(),
                    version: p.version(),
                    head,
                    td,
                    snap: table.extensions.contains_key(&p.id()),
                }
            })
            .collect();
        infos.sort_by_key(|i| i.id);
        infos
    }

    pub fn is_closed(&self) -> bool {
        self.table.read().closed
    }

    /// Disconnect every peer and fail every extension waiter. Idempotent.
    pub fn close(&self) {
        let peers: Vec<Arc<Peer>> = {
            let mut table = self.table.write();
            if table.closed {
                return;
            }
            table.closed = true;
            table.ext_waiters.clear();
            table.ext_pending.clear();
            table.peers.values().cloned().collect()
        };
        info!(peers = peers.len(), "Closing peer set");
        for peer in peers {
            peer.disconnect(DisconnectReason::ClientQuitting);
        }
    }
}
