//! # Handler Service
//!
//! One `Handler` per node. It owns no connections itself: the transport hands
//! each established connection to [`Handler::run_peer`], which runs the
//! handshake and the message loop until the connection ends.
//!
//! | File | Concern |
//! |------|---------|
//! | `peer.rs` | Handshake, registration, message dispatch, cleanup |
//! | `serve.rs` | Answering header, body, receipt and node-data requests |
//! | `gossip.rs` | Block and transaction propagation |
//! | `syncer.rs` | Choosing when and from whom to sync |

mod gossip;
mod peer;
mod serve;
mod syncer;


pub use syncer::SyncOp;

use crate::config::HandlerConfig;
use mc_01_peer_set::{ExtensionPeer, PeerSet, PeerSetError};
use mc_02_request_distributor::RequestDistributor;
use mc_03_blockchain::BlockChain;
use mc_04_txpool::TxPool;
use mc_05_downloader::Downloader;
use shared_bus::EventPublisher;
use shared_types::protocol::{Capability, Status, VERSION_63, VERSION_64, VERSION_65};
use shared_types::PeerId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Protocol handler shared by every connection of a node.
pub struct Handler {
    config: HandlerConfig,
    local_id: PeerId,
    chain: Arc<BlockChain>,
    pool: Arc<TxPool>,
    peers: Arc<PeerSet>,
    distributor: Arc<RequestDistributor>,
    downloader: Arc<Downloader>,
    events: Arc<dyn EventPublisher>,
    /// Remote transactions are dropped until the first sync or block import.
    accept_txs: AtomicBool,
    sync_wakeup: Notify,
}

impl Handler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: HandlerConfig,
        local_id: PeerId,
        chain: Arc<BlockChain>,
        pool: Arc<TxPool>,
        peers: Arc<PeerSet>,
        distributor: Arc<RequestDistributor>,
        downloader: Arc<Downloader>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            config,
            local_id,
            chain,
            pool,
            peers,
            distributor,
            downloader,
            events,
            accept_txs: AtomicBool::new(false),
            sync_wakeup: Notify::new(),
        }
    }

    pub fn config(&self) -> &HandlerConfig {
        &self.config
    }

    pub fn local_id(&self) -> PeerId {
        self.local_id
    }

    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.peers
    }

    pub fn downloader(&self) -> &Arc<Downloader> {
        &self.downloader
    }

    /// The `Status` this node sends in handshakes.
    pub fn status(&self) -> Status {
        let head = self.chain.current_block();
        Status {
            peer_id: self.local_id,
            protocol_version: VERSION_65,
            network_id: self.config.network_id,
            td: self.chain.current_td(),
            head: head.hash(),
            genesis: self.chain.genesis().hash(),
            capabilities: vec![
                Capability::base(VERSION_65),
                Capability::base(VERSION_64),
                Capability::base(VERSION_63),
            ],
        }
    }

    pub fn accepts_transactions(&self) -> bool {
        self.accept_txs.load(Ordering::Acquire)
    }

    /// Start accepting remote transactions. Sync completion and block import
    /// call this; a node that needs no sync can call it directly.
    pub fn enable_transactions(&self) {
        if !self.accept_txs.swap(true, Ordering::AcqRel) {
            tracing::info!("Accepting remote transactions");
        }
    }

    /// Attach the snap extension of a peer whose base connection is waiting
    /// in its handshake.
    pub fn register_extension(&self, ext: ExtensionPeer) -> Result<(), PeerSetError> {
        self.peers.register_extension(ext)
    }

    /// Ask the chain syncer to look for a better peer now.
    pub fn request_sync(&self) {
        self.sync_wakeup.notify_one();
    }

    /// Close the peer set and stop any running sync. Connections still
    /// running end on their own cancellation tokens.
    pub fn close(&self) {
        self.downloader.cancel();
        self.peers.close();
        self.distributor.close();
    }
}
