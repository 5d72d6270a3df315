//! Test utilities for the handler.
//!
//! Enable with the `test-utils` feature flag. A [`TestNode`] is a complete
//! in-memory node; [`connect`] joins two of them with a [`MessagePipe`].

use crate::adapters::MessagePipe;
use crate::config::HandlerConfig;
use crate::domain::HandlerError;
use crate::service::Handler;
use mc_01_peer_set::PeerSet;
use mc_02_request_distributor::{DistributorConfig, RequestDistributor};
use mc_03_blockchain::{
    BasicEngine, BlockChain, ChainConfig, ConsensusEngine, ExecutionEngine, Genesis,
    InMemoryKVStore, TransferExecutor,
};
use mc_04_txpool::{TxPool, TxPoolConfig};
use mc_05_downloader::{Downloader, DownloaderConfig};
use shared_bus::InMemoryEventBus;
use shared_crypto::Secp256k1Recovery;
use shared_types::PeerId;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Every component of a node, wired as the runtime wires them.
pub struct TestNode {
    pub id: PeerId,
    pub engine: Arc<dyn ConsensusEngine>,
    pub executor: Arc<dyn ExecutionEngine>,
    pub bus: Arc<InMemoryEventBus>,
    pub chain: Arc<BlockChain>,
    pub pool: Arc<TxPool>,
    pub peers: Arc<PeerSet>,
    pub distributor: Arc<RequestDistributor>,
    pub downloader: Arc<Downloader>,
    pub handler: Arc<Handler>,
}

impl TestNode {
    /// A node with id `PeerId::from_byte(tag)` on `genesis`.
    pub fn new(tag: u8, genesis: &Genesis) -> Self {
        Self::with_config(tag, genesis, HandlerConfig::for_testing())
    }

    pub fn with_config(tag: u8, genesis: &Genesis, config: HandlerConfig) -> Self {
        let id = PeerId::from_byte(tag);
        let recovery = Arc::new(Secp256k1Recovery::new());
        let engine: Arc<dyn ConsensusEngine> = Arc::new(BasicEngine::proof_of_work());
        let executor: Arc<dyn ExecutionEngine> =
            Arc::new(TransferExecutor::new(recovery.clone()));
        let bus = Arc::new(InMemoryEventBus::new());
        let chain = Arc::new(
            BlockChain::new(
                Arc::new(InMemoryKVStore::new()),
                genesis,
                engine.clone(),
                executor.clone(),
                bus.clone(),
                ChainConfig::for_testing(),
            )
            .expect("genesis commits to an empty store"),
        );
        let pool = Arc::new(TxPool::new(
            TxPoolConfig::for_testing(),
            chain.clone(),
            recovery,
            bus.clone(),
        ));
        let peers = Arc::new(PeerSet::new());
        let distributor = Arc::new(RequestDistributor::new(
            peers.clone(),
            DistributorConfig::for_testing(),
        ));
        let downloader = Arc::new(Downloader::new(
            DownloaderConfig::for_testing(),
            chain.clone(),
            peers.clone(),
            distributor.clone(),
            bus.clone(),
        ));
        let handler = Arc::new(Handler::new(
            config,
            id,
            chain.clone(),
            pool.clone(),
            peers.clone(),
            distributor.clone(),
            downloader.clone(),
            bus.clone(),
        ));
        Self {
            id,
            engine,
            executor,
            bus,
            chain,
            pool,
            peers,
            distributor,
            downloader,
            handler,
        }
    }

    /// Wait until `count` peers are registered. Returns false after two
    /// seconds.
    pub async fn wait_for_peers(&self, count: usize) -> bool {
        eventually(|| self.peers.len() == count).await
    }
}

/// Poll `condition` every 10ms for up to two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub type PeerTask = JoinHandle<Result<(), HandlerError>>;

/// Join `a` and `b` over an in-memory pipe. Each side runs in its own task
/// until `cancel` fires or the other side goes away.
pub fn connect(a: &TestNode, b: &TestNode, cancel: &CancellationToken) -> (PeerTask, PeerTask) {
    let (a_end, b_end) = MessagePipe::pair();
    let a_task = {
        let handler = a.handler.clone();
        let cancel = cancel.child_token();
        tokio::spawn(async move {
            handler
                .run_peer(a_end.conn, Box::new(a_end.inbound), cancel)
                .await
        })
    };
    let b_task = {
        let handler = b.handler.clone();
        let cancel = cancel.child_token();
        tokio::spawn(async move {
            handler
                .run_peer(b_end.conn, Box::new(b_end.inbound), cancel)
                .await
        })
    };
    (a_task, b_task)
}
