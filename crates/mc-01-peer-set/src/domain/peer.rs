//! Connected peer state.

use crate::ports::{ConnectionError, PeerConnection};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use shared_types::protocol::{
    BlockAnnouncement, Capability, DisconnectReason, Message, BASE_PROTOCOL, SNAP_PROTOCOL,
};
use shared_types::{
    Block, BlockBody, BlockHeader, Hash, HashOrNumber, PeerId, Receipt, Transaction, U256,
};
use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::trace;

/// Block hashes remembered per peer.
pub const MAX_KNOWN_BLOCKS: usize = 1024;

/// Transaction hashes remembered per peer.
pub const MAX_KNOWN_TXS: usize = 32_768;

/// A peer running the base protocol.
pub struct Peer {
    id: PeerId,
    version: u32,
    capabilities: Vec<Capability>,
    head: RwLock<(Hash, U256)>,
    known_blocks: Mutex<LruCache<Hash, ()>>,
    known_txs: Mutex<LruCache<Hash, ()>>,
    conn: Arc<dyn PeerConnection>,
}

impl Peer {
    pub fn new(
        id: PeerId,
        version: u32,
        capabilities: Vec<Capability>,
        head: Hash,
        td: U256,
        conn: Arc<dyn PeerConnection>,
    ) -> Self {
        Self::with_cache_limits(
            id,
            version,
            capabilities,
            head,
            td,
            conn,
            MAX_KNOWN_BLOCKS,
            MAX_KNOWN_TXS,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_cache_limits(
        id: PeerId,
        version: u32,
        capabilities: Vec<Capability>,
        head: Hash,
        td: U256,
        conn: Arc<dyn PeerConnection>,
        max_blocks: usize,
        max_txs: usize,
    ) -> Self {
        let cap = |n: usize| NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN);
        Self {
            id,
            version,
            capabilities,
            head: RwLock::new((head, td)),
            known_blocks: Mutex::new(LruCache::new(cap(max_blocks))),
            known_txs: Mutex::new(LruCache::new(cap(max_txs))),
            conn,
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Negotiated base protocol version.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    /// Whether the peer advertised the named protocol.
    pub fn supports(&self, protocol: &str) -> bool {
        self.capabilities.iter().any(|c| c.name == protocol)
    }

    /// Whether the peer advertised the snap extension.
    pub fn supports_snap(&self) -> bool {
        self.supports(SNAP_PROTOCOL)
    }

    /// Advertised head hash and total difficulty.
    pub fn head(&self) -> (Hash, U256) {
        *self.head.read()
    }

    pub fn td(&self) -> U256 {
        self.head.read().1
    }

    pub fn set_head(&self, hash: Hash, td: U256) {
        *self.head.write() = (hash, td);
    }

    pub fn mark_block(&self, hash: Hash) {
        self.known_blocks.lock().put(hash, ());
    }

    pub fn knows_block(&self, hash: &Hash) -> bool {
        self.known_blocks.lock().contains(hash)
    }

    pub fn mark_transaction(&self, hash: Hash) {
        self.known_txs.lock().put(hash, ());
    }

    pub fn knows_transaction(&self, hash: &Hash) -> bool {
        self.known_txs.lock().contains(hash)
    }

    fn send(&self, message: Message) -> Result<(), ConnectionError> {
        trace!(peer = %self.id, msg = message.name(), "Sending message");
        self.conn.send(message)
    }

    // =========================================================================
    // GOSSIP
    // =========================================================================

    /// Send transactions and remember them as known.
    pub fn send_transactions(&self, txs: Vec<Transaction>) -> Result<(), ConnectionError> {
        {
            let mut known = self.known_txs.lock();
            for tx in &txs {
                known.put(tx.hash(), ());
            }
        }
        self.send(Message::Transactions(txs))
    }

    /// Announce block hashes and remember them as known.
    pub fn send_new_block_hashes(
        &self,
        announcements: Vec<BlockAnnouncement>,
    ) -> Result<(), ConnectionError> {
        {
            let mut known = self.known_blocks.lock();
            for ann in &announcements {
                known.put(ann.hash, ());
            }
        }
        self.send(Message::NewBlockHashes(announcements))
    }

    /// Propagate a full block and remember it as known.
    pub fn send_new_block(&self, block: Block, td: U256) -> Result<(), ConnectionError> {
        self.mark_block(block.hash());
        self.send(Message::NewBlock { block, td })
    }

    // =========================================================================
    // REQUESTS
    // =========================================================================

    pub fn request_headers_by_hash(
        &self,
        request_id: u64,
        origin: Hash,
        amount: u64,
        skip: u64,
        reverse: bool,
    ) -> Result<(), ConnectionError> {
        self.send(Message::GetBlockHeaders {
            request_id,
            origin: HashOrNumber::Hash(origin),
            amount,
            skip,
            reverse,
        })
    }

    pub fn request_headers_by_number(
        &self,
        request_id: u64,
        origin: u64,
        amount: u64,
        skip: u64,
        reverse: bool,
    ) -> Result<(), ConnectionError> {
        self.send(Message::GetBlockHeaders {
            request_id,
            origin: HashOrNumber::Number(origin),
            amount,
            skip,
            reverse,
        })
    }

    pub fn request_bodies(&self, request_id: u64, hashes: Vec<Hash>) -> Result<(), ConnectionError> {
        self.send(Message::GetBlockBodies { request_id, hashes })
    }

    pub fn request_receipts(
        &self,
        request_id: u64,
        hashes: Vec<Hash>,
    ) -> Result<(), ConnectionError> {
        self.send(Message::GetReceipts { request_id, hashes })
    }

    pub fn request_node_data(
        &self,
        request_id: u64,
        hashes: Vec<Hash>,
    ) -> Result<(), ConnectionError> {
        self.send(Message::GetNodeData { request_id, hashes })
    }

    // =========================================================================
    // RESPONSES
    // =========================================================================

    pub fn send_block_headers(
        &self,
        request_id: u64,
        headers: Vec<BlockHeader>,
    ) -> Result<(), ConnectionError> {
        self.send(Message::BlockHeaders {
            request_id,
            headers,
        })
    }

    pub fn send_block_bodies(
        &self,
        request_id: u64,
        bodies: Vec<BlockBody>,
    ) -> Result<(), ConnectionError> {
        self.send(Message::BlockBodies { request_id, bodies })
    }

    pub fn send_receipts(
        &self,
        request_id: u64,
        receipts: Vec<Vec<Receipt>>,
    ) -> Result<(), ConnectionError> {
        self.send(Message::Receipts {
            request_id,
            receipts,
        })
    }

    pub fn send_node_data(
        &self,
        request_id: u64,
        nodes: Vec<Vec<u8>>,
    ) -> Result<(), ConnectionError> {
        self.send(Message::NodeData { request_id, nodes })
    }

    /// Close the connection. The peer's task unregisters it.
    pub fn disconnect(&self, reason: DisconnectReason) {
        self.conn.disconnect(reason);
    }
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("td", &self.td())
            .finish()
    }
}

/// A connection running the snap extension next to the base protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionPeer {
    pub id: PeerId,
    pub version: u32,
    pub capabilities: Vec<Capability>,
}

impl ExtensionPeer {
    pub fn new(id: PeerId, version: u32, capabilities: Vec<Capability>) -> Self {
        Self {
            id,
            version,
            capabilities,
        }
    }

    /// The extension is only valid on a connection that also runs the base protocol.
    pub fn runs_base(&self) -> bool {
        self.capabilities.iter().any(|c| c.name == BASE_PROTOCOL)
    }
}

/// Summary of one peer for status output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub version: u32,
    pub head: Hash,
    pub td: U256,
    pub snap: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Sink(StdMutex<Vec<Message>>);

    impl PeerConnection for Sink {
        fn send(&self, message: Message) -> Result<(), ConnectionError> {
            self.0.lock().unwrap().push(message);
            Ok(())
        }
        fn disconnect(&self, _reason: DisconnectReason) {}
    }

    fn peer_with(max_blocks: usize) -> (Peer, Arc<Sink>) {
        let sink = Arc::new(Sink::default());
        let peer = Peer::with_cache_limits(
            PeerId::from_byte(1),
            65,
            vec![Capability::base(65)],
            [0u8; 32],
            U256::from(10),
            sink.clone(),
            max_blocks,
            16,
        );
        (peer, sink)
    }

    #[test]
    fn test_known_blocks_are_bounded() {
        let (peer, _) = peer_with(2);
        peer.mark_block([1u8; 32]);
        peer.mark_block([2u8; 32]);
        peer.mark_block([3u8; 32]);
        assert!(!peer.knows_block(&[1u8; 32]));
        assert!(peer.knows_block(&[3u8; 32]));
    }

    #[test]
    fn test_send_transactions_marks_known() {
        let (peer, sink) = peer_with(4);
        let tx = Transaction {
            nonce: 7,
            ..Default::default()
        };
        peer.send_transactions(vec![tx.clone()]).unwrap();
        assert!(peer.knows_transaction(&tx.hash()));
        assert_eq!(sink.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_set_head_updates_td() {
        let (peer, _) = peer_with(4);
        peer.set_head([9u8; 32], U256::from(99));
        assert_eq!(peer.head(), ([9u8; 32], U256::from(99)));
        assert!(!peer.supports_snap());
    }

    #[test]
    fn test_extension_requires_base() {
        let ext = ExtensionPeer::new(PeerId::from_byte(1), 1, vec![Capability::snap()]);
        assert!(!ext.runs_base());
        let ext = ExtensionPeer::new(
            PeerId::from_byte(1),
            1,
            vec![Capability::base(65), Capability::snap()],
        );
        assert!(ext.runs_base());
    }
}
