use super::*;
use crate::test_utils::{serving_peer, Fault, ServingConnection};
use mc_01_peer_set::Peer;
use mc_02_request_distributor::DistributorConfig;
use mc_03_blockchain::{
    BasicEngine, ChainConfig, ChainMaker, ConsensusEngine, ExecutionEngine, Genesis,
    InMemoryKVStore, TransferExecutor,
};
use shared_bus::{EventFilter, EventTopic, InMemoryEventBus};
use shared_crypto::{Secp256k1KeyPair, Secp256k1Recovery};
use shared_types::protocol::DisconnectReason;
use shared_types::Transaction;
use std::time::Duration;

const FUNDS: u64 = 1_000_000_000_000_000_000;

struct Harness {
    genesis: Genesis,
    engine: Arc<dyn ConsensusEngine>,
    executor: Arc<dyn ExecutionEngine>,
    alice: Secp256k1KeyPair,
    bus: Arc<InMemoryEventBus>,
    chain: Arc<BlockChain>,
    peers: Arc<PeerSet>,
    distributor: Arc<RequestDistributor>,
    downloader: Arc<Downloader>,
}

impl Harness {
    fn new() -> Self {
        let alice = Secp256k1KeyPair::from_seed(1).unwrap();
        let genesis = Genesis::dev(&[alice.address()], U256::from(FUNDS));
        let engine: Arc<dyn ConsensusEngine> = Arc::new(BasicEngine::proof_of_work());
        let executor: Arc<dyn ExecutionEngine> =
            Arc::new(TransferExecutor::new(Arc::new(Secp256k1Recovery::new())));
        let bus = Arc::new(InMemoryEventBus::new());
        let chain = open_chain(&genesis, &engine, &executor, bus.clone());
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
        Self {
            genesis,
            engine,
            executor,
            alice,
            bus,
            chain,
            peers,
            distributor,
            downloader,
        }
    }

    fn maker(&self) -> ChainMaker {
        ChainMaker::new(self.engine.clone(), self.executor.clone())
    }

    /// `n` blocks on genesis, each carrying one transfer from alice.
    fn blocks(&self, n: usize) -> Vec<Block> {
        self.maker()
            .generate(&self.genesis.to_block(), &self.genesis.state(), n, |i, gen| {
                gen.add_tx(transfer(&self.alice, i as u64)).unwrap();
            })
            .unwrap()
    }

    /// A separate chain holding `blocks`.
    fn remote(&self, blocks: &[Block]) -> Arc<BlockChain> {
        let chain = open_chain(
            &self.genesis,
            &self.engine,
            &self.executor,
            Arc::new(InMemoryEventBus::new()),
        );
        chain.insert_chain(blocks).unwrap();
        chain
    }

    fn connect(&self, tag: u8, remote: &Arc<BlockChain>) -> (Arc<Peer>, Arc<ServingConnection>) {
        let (peer, conn) = serving_peer(tag, remote, &self.distributor);
        self.peers.register(peer.clone(), None).unwrap();
        self.distributor.peers_changed();
        (peer, conn)
    }

    async fn sync(&self, peer: &Peer, mode: SyncMode) -> Result<SyncReport, SyncError> {
        let (hash, td) = peer.head();
        self.downloader.synchronise(peer.id(), hash, td, mode).await
    }
}

fn open_chain(
    genesis: &Genesis,
    engine: &Arc<dyn ConsensusEngine>,
    executor: &Arc<dyn ExecutionEngine>,
    bus: Arc<InMemoryEventBus>,
) -> Arc<BlockChain> {
    Arc::new(
        BlockChain::new(
            Arc::new(InMemoryKVStore::new()),
            genesis,
            engine.clone(),
            executor.clone(),
            bus,
            ChainConfig::for_testing(),
        )
        .unwrap(),
    )
}

fn transfer(key: &Secp256k1KeyPair, nonce: u64) -> Transaction {
    key.sign_transaction(Transaction {
        nonce,
        gas_price: U256::from(1),
        gas_limit: 21_000,
        to: Some([0xee; 20]),
        value: U256::from(1),
        ..Default::default()
    })
    .unwrap()
}

// =============================================================================
// FULL SYNC
// =============================================================================

#[tokio::test]
async fn test_full_sync_over_several_batches() {
    let h = Harness::new();
    let blocks = h.blocks(10);
    let remote = h.remote(&blocks);
    let (peer, _) = h.connect(1, &remote);

    let report = h.sync(&peer, SyncMode::Full).await.unwrap();

    assert_eq!(report.mode, SyncMode::Full);
    assert_eq!(report.origin, 0);
    assert_eq!(report.head, 10);
    assert_eq!(report.head_hash, blocks[9].hash());
    assert_eq!(report.imported, 10);
    assert_eq!(report.pivot, None);
    assert_eq!(h.chain.current_block().hash(), blocks[9].hash());

    let progress = h.downloader.progress();
    assert_eq!(progress.starting_block, 0);
    assert_eq!(progress.current_block, 10);
    assert_eq!(progress.highest_block, 10);
    assert_eq!(h.downloader.state(), SyncState::Idle);
    assert!(!h.downloader.is_syncing());
}

#[tokio::test]
async fn test_sync_resumes_from_fork_point() {
    let h = Harness::new();
    let maker = h.maker();
    let common = maker
        .generate(&h.genesis.to_block(), &h.genesis.state(), 3, |_, _| {})
        .unwrap();
    h.chain.insert_chain(&common).unwrap();
    let state = h.chain.state_at(&common[2].header.state_root).unwrap();

    let ours = maker
        .generate(&common[2], &state, 2, |_, gen| gen.set_extra(vec![0xaa]))
        .unwrap();
    let theirs = maker
        .generate(&common[2], &state, 5, |_, gen| gen.set_extra(vec![0xbb]))
        .unwrap();
    h.chain.insert_chain(&ours).unwrap();
    assert_eq!(h.chain.current_block().number(), 5);

    let remote = h.remote(&[common.clone(), theirs.clone()].concat());
    let (peer, _) = h.connect(1, &remote);

    let report = h.sync(&peer, SyncMode::Full).await.unwrap();
    assert_eq!(report.origin, 3);
    assert_eq!(report.head, 8);
    assert_eq!(h.chain.current_block().hash(), theirs[4].hash());
    assert_eq!(h.chain.canonical_hash(4), Some(theirs[0].hash()));
}

#[tokio::test]
async fn test_second_attempt_is_busy() {
    let h = Harness::new();
    let remote = h.remote(&h.blocks(4));
    let (peer, _) = h.connect(1, &remote);

    let (first, second) = tokio::join!(
        h.sync(&peer, SyncMode::Full),
        h.sync(&peer, SyncMode::Full)
    );
    assert!(first.is_ok());
    assert_eq!(second.unwrap_err(), SyncError::Busy);
}

#[tokio::test]
async fn test_unknown_peer_rejected() {
    let h = Harness::new();
    let result = h
        .downloader
        .synchronise(PeerId::from_byte(9), [0u8; 32], U256::zero(), SyncMode::Full)
        .await;
    assert_eq!(result.unwrap_err(), SyncError::UnknownPeer(PeerId::from_byte(9)));
    assert!(!h.downloader.is_syncing());
}

#[tokio::test]
async fn test_genesis_mismatch_is_invalid_ancestor() {
    let h = Harness::new();
    let other = Genesis::dev(&[[0x42; 20]], U256::from(FUNDS));
    let remote = open_chain(
        &other,
        &h.engine,
        &h.executor,
        Arc::new(InMemoryEventBus::new()),
    );
    let blocks = h
        .maker()
        .generate(&other.to_block(), &other.state(), 3, |_, _| {})
        .unwrap();
    remote.insert_chain(&blocks).unwrap();
    let (peer, _) = h.connect(1, &remote);

    let err = h.sync(&peer, SyncMode::Full).await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidAncestor(_)), "got {err:?}");
    assert_eq!(h.downloader.state(), SyncState::Failed);
    assert_eq!(h.chain.current_block().number(), 0);
}

// =============================================================================
// PEER FAULTS
// =============================================================================

#[tokio::test]
async fn test_invalid_header_aborts_batch() {
    let h = Harness::new();
    let blocks = h.blocks(10);
    h.chain.insert_chain(&blocks[..2]).unwrap();
    let remote = h.remote(&blocks);
    let (peer, conn) = h.connect(1, &remote);
    conn.set_fault(Fault::TamperHeader(5));

    let err = h.sync(&peer, SyncMode::Full).await.unwrap_err();
    match err {
        SyncError::InvalidHeaders { peer: id, number, .. } => {
            assert_eq!(id, peer.id());
            assert_eq!(number, 5);
        }
        other => panic!("expected invalid headers, got {other:?}"),
    }

    // Nothing from the rejected batch was committed.
    assert_eq!(h.chain.current_block().number(), 2);
    for block in &blocks[2..6] {
        assert!(!h.chain.has_block(&block.hash()));
    }
    assert_eq!(conn.disconnect_reason(), Some(DisconnectReason::UnreliablePeer));
}

#[tokio::test]
async fn test_corrupt_bodies_refetched_from_other_peer() {
    let h = Harness::new();
    let blocks = h.blocks(8);
    let remote = h.remote(&blocks);
    let (good, good_conn) = h.connect(1, &remote);
    let (_bad, bad_conn) = h.connect(2, &remote);
    bad_conn.set_fault(Fault::CorruptBodies);

    // Two concurrent body chunks keep both peers busy.
    let report = h.sync(&good, SyncMode::Full).await.unwrap();
    assert_eq!(report.head, 8);
    for block in &blocks {
        assert_eq!(h.chain.get_body(&block.hash()), Some(block.body()));
    }
    assert_eq!(
        bad_conn.disconnect_reason(),
        Some(DisconnectReason::UnreliablePeer)
    );
    assert_eq!(good_conn.disconnect_reason(), None);
}

#[tokio::test]
async fn test_cancel_ends_attempt() {
    let h = Harness::new();
    let remote = h.remote(&h.blocks(4));
    let (peer, conn) = h.connect(1, &remote);
    conn.set_fault(Fault::Silent);

    let downloader = h.downloader.clone();
    let (hash, td) = peer.head();
    let id = peer.id();
    let task = tokio::spawn(async move {
        downloader.synchronise(id, hash, td, SyncMode::Full).await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.downloader.is_syncing());
    h.downloader.cancel();

    assert_eq!(task.await.unwrap().unwrap_err(), SyncError::Cancelled);
    assert_eq!(h.downloader.state(), SyncState::Idle);
    assert!(!h.downloader.is_syncing());
}

// =============================================================================
// FAST SYNC
// =============================================================================

#[tokio::test]
async fn test_fast_sync_downloads_pivot_state() {
    let h = Harness::new();
    assert!(h.downloader.fast_sync_gate().is_enabled());
    let blocks = h.blocks(12);
    let remote = h.remote(&blocks);
    let (peer, _) = h.connect(1, &remote);

    let report = h.sync(&peer, SyncMode::Fast).await.unwrap();

    assert_eq!(report.mode, SyncMode::Fast);
    assert_eq!(report.pivot, Some(9));
    assert_eq!(report.head, 12);
    assert_eq!(h.chain.current_block().hash(), blocks[11].hash());
    assert!(h.chain.has_state(&blocks[8].header.state_root));
    assert!(h.chain.has_state(&blocks[11].header.state_root));
    assert_eq!(
        h.chain.get_receipts(&blocks[3].hash()).map(|r| r.len()),
        Some(1)
    );
    assert!(h.downloader.progress().pulled_states > 0);
}

#[tokio::test]
async fn test_fast_sync_short_chain_runs_full() {
    let h = Harness::new();
    let remote = h.remote(&h.blocks(2));
    let (peer, _) = h.connect(1, &remote);

    let report = h.sync(&peer, SyncMode::Fast).await.unwrap();
    assert_eq!(report.mode, SyncMode::Full);
    assert_eq!(report.pivot, None);
    assert_eq!(report.head, 2);
}

// =============================================================================
// EVENTS
// =============================================================================

#[tokio::test]
async fn test_sync_events() {
    let h = Harness::new();
    let mut sub = h.bus.subscribe(EventFilter::topics(vec![EventTopic::Sync]));
    let blocks = h.blocks(3);
    let remote = h.remote(&blocks);
    let (peer, _) = h.connect(1, &remote);

    h.sync(&peer, SyncMode::Full).await.unwrap();
    assert_eq!(
        sub.try_recv().unwrap(),
        Some(ChainEvent::SyncStarted {
            origin: 0,
            target: 3
        })
    );
    assert_eq!(
        sub.try_recv().unwrap(),
        Some(ChainEvent::SyncCompleted {
            head: 3,
            head_hash: blocks[2].hash()
        })
    );

    // Nothing left to do, but a failing attempt still reports.
    h.peers.unregister(&peer.id()).unwrap();
    h.distributor.peer_dropped(&peer.id());
    let (hash, td) = peer.head();
    let _ = h.downloader.synchronise(peer.id(), hash, td, SyncMode::Full).await;
    assert!(matches!(
        sub.try_recv().unwrap(),
        Some(ChainEvent::SyncFailed { .. })
    ));
}
