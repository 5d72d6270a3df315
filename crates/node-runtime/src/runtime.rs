//! # Node Runtime
//!
//! Builds every component from a [`NodeConfig`] and owns the tasks that
//! drive them.
//!
//! ## Startup Sequence
//!
//! 1. Open the store (in-memory or RocksDB) and load or commit genesis
//! 2. Build pool, peer set, distributor, downloader and handler
//! 3. Subscribe the background tasks to the bus
//! 4. Spawn syncer, tx broadcast, pool reset, miner gate and metrics tasks
//! 5. Bind the listener and dial bootnodes
//!
//! ## Shutdown
//!
//! [`NodeRuntime::shutdown`] cancels the root token, which ends every task
//! and peer session, then closes the handler (peer set, distributor and any
//! running sync).

use crate::config::{ConfigError, EngineChoice, NodeConfig, StorageBackend, StorageConfig};
use crate::miner::MinerGate;
use crate::wiring::{run_dialer, run_listener, MetricsRecorder};
use mc_01_peer_set::PeerSet;
use mc_02_request_distributor::RequestDistributor;
use mc_03_blockchain::{
    BasicEngine, BlockChain, ChainError, ConsensusEngine, ExecutionEngine, InMemoryKVStore,
    KeyValueStore, KvError, TransferExecutor,
};
use mc_04_txpool::TxPool;
use mc_05_downloader::Downloader;
use mc_06_handler::Handler;
use parking_lot::Mutex;
use shared_bus::{EventFilter, EventTopic, InMemoryEventBus};
use shared_crypto::Secp256k1Recovery;
use shared_types::PeerId;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Time tasks get to stop after cancellation before they are aborted.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Runtime startup errors.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("storage: {0}")]
    Storage(#[from] KvError),

    #[error("chain: {0}")]
    Chain(#[from] ChainError),

    #[error("only {available}% disk free, {required}% required")]
    LowDiskSpace { available: u8, required: u8 },

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("runtime already started")]
    AlreadyStarted,
}

/// A fully wired node.
pub struct NodeRuntime {
    config: NodeConfig,
    id: PeerId,
    engine: Arc<dyn ConsensusEngine>,
    executor: Arc<dyn ExecutionEngine>,
    bus: Arc<InMemoryEventBus>,
    chain: Arc<BlockChain>,
    pool: Arc<TxPool>,
    peers: Arc<PeerSet>,
    downloader: Arc<Downloader>,
    handler: Arc<Handler>,
    miner: Arc<MinerGate>,
    cancel: CancellationToken,
    tasks: Mutex<JoinSet<()>>,
    started: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl NodeRuntime {
    /// Build a node on the store named by `config.storage`.
    pub fn new(config: NodeConfig) -> Result<Self, RuntimeError> {
        config.validate()?;
        let store = open_store(&config.storage)?;
        Self::with_store(config, store)
    }

    /// Build a node on an already opened store.
    pub fn with_store(
        config: NodeConfig,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self, RuntimeError> {
        let id = config.node_id();
        info!(node = %id, network = config.handler.network_id, "Creating Meridian-Chain node runtime");

        let recovery = Arc::new(Secp256k1Recovery::new());
        let engine: Arc<dyn ConsensusEngine> = match config.miner.engine {
            EngineChoice::ProofOfWork => Arc::new(BasicEngine::proof_of_work()),
            EngineChoice::ProofOfAuthority => Arc::new(BasicEngine::proof_of_authority()),
        };
        let executor: Arc<dyn ExecutionEngine> =
            Arc::new(TransferExecutor::new(recovery.clone()));
        let bus = Arc::new(InMemoryEventBus::new());

        let chain = Arc::new(BlockChain::new(
            store,
            &config.genesis,
            engine.clone(),
            executor.clone(),
            bus.clone(),
            config.chain.clone(),
        )?);
        let pool = Arc::new(TxPool::new(
            config.txpool.clone(),
            chain.clone(),
            recovery,
            bus.clone(),
        ));
        let peers = Arc::new(PeerSet::new());
        let distributor = Arc::new(RequestDistributor::new(
            peers.clone(),
            config.distributor.clone(),
        ));
        let downloader = Arc::new(Downloader::new(
            config.downloader.clone(),
            chain.clone(),
            peers.clone(),
            distributor.clone(),
            bus.clone(),
        ));
        let handler = Arc::new(Handler::new(
            config.handler.clone(),
            id,
            chain.clone(),
            pool.clone(),
            peers.clone(),
            distributor,
            downloader.clone(),
            bus.clone(),
        ));
        let miner = Arc::new(MinerGate::new(engine.clone()));

        Ok(Self {
            config,
            id,
            engine,
            executor,
            bus,
            chain,
            pool,
            peers,
            downloader,
            handler,
            miner,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(JoinSet::new()),
            started: AtomicBool::new(false),
            local_addr: Mutex::new(None),
        })
    }

    /// Spawn the background tasks, bind the listener and dial bootnodes.
    pub async fn start(&self) -> Result<(), RuntimeError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::AlreadyStarted);
        }

        let listener = match self.config.network.listen_addr {
            Some(addr) => {
                let listener = TcpListener::bind(addr).await?;
                let bound = listener.local_addr()?;
                *self.local_addr.lock() = Some(bound);
                info!(addr = %bound, "Listening for peers");
                Some(listener)
            }
            None => None,
        };

        let mut tasks = self.tasks.lock();

        tasks.spawn(self.handler.clone().run_syncer(self.cancel.child_token()));
        tasks.spawn(self.handler.clone().run_tx_broadcast(
            self.bus
                .subscribe(EventFilter::topics(vec![EventTopic::Transactions])),
            self.cancel.child_token(),
        ));
        tasks.spawn(self.pool.clone().run(
            self.bus
                .subscribe(EventFilter::topics(vec![EventTopic::ChainHead])),
            self.cancel.child_token(),
        ));
        tasks.spawn(self.miner.clone().run(
            self.bus.subscribe(EventFilter::topics(vec![EventTopic::Sync])),
            self.cancel.child_token(),
        ));
        if self.config.telemetry.metrics_enabled {
            let recorder =
                MetricsRecorder::new(self.chain.clone(), self.pool.clone(), self.peers.clone());
            tasks.spawn(recorder.run(
                self.bus.subscribe(EventFilter::all()),
                self.cancel.child_token(),
            ));
        }

        if let Some(listener) = listener {
            tasks.spawn(run_listener(
                self.handler.clone(),
                listener,
                self.cancel.child_token(),
            ));
        }
        for addr in &self.config.network.bootnodes {
            tasks.spawn(run_dialer(
                self.handler.clone(),
                *addr,
                self.config.network.redial_interval(),
                self.cancel.child_token(),
            ));
        }
        drop(tasks);

        if self.config.miner.enabled {
            self.miner.start_mining(self.config.miner.threads);
        }

        let head = self.chain.current_block();
        info!(
            head = head.number(),
            fast_sync = self.downloader.fast_sync_gate().is_enabled(),
            bootnodes = self.config.network.bootnodes.len(),
            "Node started"
        );
        Ok(())
    }

    /// Stop every task and close the network side.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");
        self.cancel.cancel();
        self.handler.close();

        let mut tasks = std::mem::take(&mut *self.tasks.lock());
        let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = tasks.len(), "Tasks still running after grace period, aborting");
            tasks.abort_all();
        }
        info!("Shutdown complete");
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Bound listen address once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn engine(&self) -> &Arc<dyn ConsensusEngine> {
        &self.engine
    }

    pub fn executor(&self) -> &Arc<dyn ExecutionEngine> {
        &self.executor
    }

    pub fn bus(&self) -> &Arc<InMemoryEventBus> {
        &self.bus
    }

    pub fn chain(&self) -> &Arc<BlockChain> {
        &self.chain
    }

    pub fn pool(&self) -> &Arc<TxPool> {
        &self.pool
    }

    pub fn peers(&self) -> &Arc<PeerSet> {
        &self.peers
    }

    pub fn downloader(&self) -> &Arc<Downloader> {
        &self.downloader
    }

    pub fn handler(&self) -> &Arc<Handler> {
        &self.handler
    }

    pub fn miner(&self) -> &Arc<MinerGate> {
        &self.miner
    }
}

fn open_store(config: &StorageConfig) -> Result<Arc<dyn KeyValueStore>, RuntimeError> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(InMemoryKVStore::new())),
        #[cfg(feature = "rocksdb")]
        StorageBackend::RocksDb => {
            use crate::storage::{available_disk_space_percent, RocksDbConfig, RocksDbStore};

            std::fs::create_dir_all(&config.data_dir)?;
            let available = available_disk_space_percent(&config.data_dir)?;
            if available < config.min_free_disk_percent {
                return Err(RuntimeError::LowDiskSpace {
                    available,
                    required: config.min_free_disk_percent,
                });
            }
            let db_config = RocksDbConfig::under(&config.data_dir);
            let store = RocksDbStore::open(&db_config)?;
            info!(path = %db_config.path.display(), "Opened RocksDB store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "rocksdb"))]
        StorageBackend::RocksDb => Err(ConfigError::RocksDbUnavailable.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mc_03_blockchain::{ChainMaker, Genesis};
    use shared_crypto::Secp256k1KeyPair;
    use shared_types::{Block, Transaction, U256};

    const FUNDS: u64 = 1_000_000_000_000_000_000;

    fn alice() -> Secp256k1KeyPair {
        Secp256k1KeyPair::from_seed(1).unwrap()
    }

    fn test_config() -> NodeConfig {
        let mut config = NodeConfig::for_testing();
        config.genesis = Genesis::dev(&[alice().address()], U256::from(FUNDS));
        config
    }

    fn blocks(node: &NodeRuntime, n: usize) -> Vec<Block> {
        let genesis = &node.config().genesis;
        ChainMaker::new(node.engine().clone(), node.executor().clone())
            .generate(&genesis.to_block(), &genesis.state(), n, |i, gen| {
                let tx = alice()
                    .sign_transaction(Transaction {
                        nonce: i as u64,
                        gas_price: U256::from(1),
                        gas_limit: 21_000,
                        to: Some([0xee; 20]),
                        value: U256::from(1),
                        ..Default::default()
                    })
                    .unwrap();
                gen.add_tx(tx).unwrap();
            })
            .unwrap()
    }

    async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..500 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition()
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let node = NodeRuntime::new(test_config()).unwrap();
        node.start().await.unwrap();
        assert!(node.local_addr().is_some());
        assert!(matches!(
            node.start().await,
            Err(RuntimeError::AlreadyStarted)
        ));
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_miner_starts_when_enabled() {
        let mut config = test_config();
        config.miner.enabled = true;
        config.miner.threads = 2;
        let node = NodeRuntime::new(config).unwrap();
        node.start().await.unwrap();

        assert!(node.miner().is_mining());
        let threaded = node.engine().descriptor().threaded.unwrap();
        assert_eq!(threaded.threads(), 2);
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_bootnode_sync_over_tcp() {
        let seed = NodeRuntime::new(test_config()).unwrap();
        let chain = blocks(&seed, 8);
        seed.chain().insert_chain(&chain).unwrap();
        seed.start().await.unwrap();

        let mut config = test_config();
        config.network.listen_addr = None;
        config.network.bootnodes = vec![seed.local_addr().unwrap()];
        let node = NodeRuntime::new(config).unwrap();
        node.start().await.unwrap();

        assert!(eventually(|| node.peers().len() == 1).await);
        assert!(eventually(|| node.chain().current_block().number() == 8).await);
        assert_eq!(node.chain().current_block().hash(), chain[7].hash());
        assert!(eventually(|| node.handler().accepts_transactions()).await);

        node.shutdown().await;
        seed.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_peers() {
        let seed = NodeRuntime::new(test_config()).unwrap();
        seed.start().await.unwrap();

        let mut config = test_config();
        config.network.listen_addr = None;
        config.network.bootnodes = vec![seed.local_addr().unwrap()];
        let node = NodeRuntime::new(config).unwrap();
        node.start().await.unwrap();
        assert!(eventually(|| seed.peers().len() == 1).await);

        node.shutdown().await;
        assert!(eventually(|| seed.peers().is_empty()).await);
        seed.shutdown().await;
    }
}
