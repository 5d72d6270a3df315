use super::BlockChain;
use crate::adapters::{BasicEngine, InMemoryKVStore, TransferExecutor};
use crate::chain_maker::{BlockGen, ChainMaker};
use crate::config::ChainConfig;
use crate::domain::{ChainError, Genesis};
use crate::ports::{ConsensusEngine, ExecutionEngine};
use shared_bus::{ChainEvent, EventFilter, InMemoryEventBus, Subscription};
use shared_crypto::{Secp256k1KeyPair, Secp256k1Recovery};
use shared_types::{Block, Hash, HashOrNumber, Receipt, Transaction, U256};
use std::collections::HashMap;
use std::sync::Arc;

struct Harness {
    db: Arc<InMemoryKVStore>,
    bus: Arc<InMemoryEventBus>,
    engine: Arc<dyn ConsensusEngine>,
    executor: Arc<dyn ExecutionEngine>,
    genesis: Genesis,
    key: Secp256k1KeyPair,
    chain: BlockChain,
}

impl Harness {
    fn new() -> Self {
        Self::with(Arc::new(BasicEngine::proof_of_work()), ChainConfig::for_testing())
    }

    fn with(engine: Arc<dyn ConsensusEngine>, config: ChainConfig) -> Self {
        let key = Secp256k1KeyPair::from_seed(1).unwrap();
        let genesis = Genesis::dev(&[key.address()], U256::from(10u64).pow(U256::from(18)));
        let executor: Arc<dyn ExecutionEngine> =
            Arc::new(TransferExecutor::new(Arc::new(Secp256k1Recovery::new())));
        let db = Arc::new(InMemoryKVStore::new());
        let bus = Arc::new(InMemoryEventBus::new());
        let chain = BlockChain::new(
            db.clone(),
            &genesis,
            engine.clone(),
            executor.clone(),
            bus.clone(),
            config,
        )
        .unwrap();
        Self {
            db,
            bus,
            engine,
            executor,
            genesis,
            key,
            chain,
        }
    }

    fn maker(&self) -> ChainMaker {
        ChainMaker::new(self.engine.clone(), self.executor.clone())
    }

    /// Blocks on top of genesis.
    fn generate<F: FnMut(usize, &mut BlockGen)>(&self, n: usize, gen: F) -> Vec<Block> {
        self.maker()
            .generate(&self.genesis.to_block(), &self.genesis.state(), n, gen)
            .unwrap()
    }

    fn generate_with_receipts(&self, n: usize) -> Vec<(Block, Vec<Receipt>)> {
        let key = self.key.clone();
        self.maker()
            .generate_with_receipts(&self.genesis.to_block(), &self.genesis.state(), n, |_, gen| {
                let tx = transfer(&key, gen, 100, vec![0xab]);
                gen.add_tx(tx).unwrap();
            })
            .unwrap()
    }
}

fn transfer(key: &Secp256k1KeyPair, gen: &BlockGen, value: u64, data: Vec<u8>) -> Transaction {
    key.sign_transaction(Transaction {
        nonce: gen.state().nonce(&key.address()),
        gas_price: U256::from(1),
        gas_limit: 30_000,
        to: Some([0xee; 20]),
        value: U256::from(value),
        data,
        ..Default::default()
    })
    .unwrap()
}

fn drain(sub: &mut Subscription) -> Vec<ChainEvent> {
    let mut events = Vec::new();
    while let Ok(Some(event)) = sub.try_recv() {
        events.push(event);
    }
    events
}

fn side_counts(events: &[ChainEvent]) -> HashMap<Hash, usize> {
    let mut counts = HashMap::new();
    for event in events {
        if let ChainEvent::ChainSide(block) = event {
            *counts.entry(block.hash()).or_insert(0) += 1;
        }
    }
    counts
}

fn head_events(events: &[ChainEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, ChainEvent::ChainHead(_)))
        .count()
}

// =============================================================================
// GENESIS AND REOPEN
// =============================================================================

#[test]
fn test_new_chain_commits_genesis() {
    let h = Harness::new();
    let genesis = h.genesis.to_block();

    assert_eq!(h.chain.current_block().hash(), genesis.hash());
    assert_eq!(h.chain.canonical_hash(0), Some(genesis.hash()));
    assert_eq!(h.chain.current_td(), h.genesis.difficulty);
    assert!(h.chain.has_state(&genesis.header.state_root));
    assert_eq!(
        h.chain
            .account(&genesis.header.state_root, &h.key.address())
            .unwrap()
            .balance,
        U256::from(10u64).pow(U256::from(18))
    );
}

#[test]
fn test_reopen_loads_stored_head() {
    let h = Harness::new();
    let blocks = h.generate(3, |_, _| {});
    h.chain.insert_chain(&blocks).unwrap();

    let reopened = BlockChain::new(
        h.db.clone(),
        &h.genesis,
        h.engine.clone(),
        h.executor.clone(),
        h.bus.clone(),
        ChainConfig::for_testing(),
    )
    .unwrap();
    assert_eq!(reopened.current_block().hash(), blocks[2].hash());
    assert_eq!(reopened.current_fast_block().number(), 3);
}

#[test]
fn test_reopen_with_different_genesis_fails() {
    let h = Harness::new();
    let other = Genesis::dev(&[[5u8; 20]], U256::from(1));
    let result = BlockChain::new(
        h.db.clone(),
        &other,
        h.engine.clone(),
        h.executor.clone(),
        h.bus.clone(),
        ChainConfig::for_testing(),
    );
    assert!(matches!(result, Err(ChainError::GenesisMismatch { .. })));
}

// =============================================================================
// INSERT
// =============================================================================

#[test]
fn test_insert_chain_links_canonical_blocks() {
    let h = Harness::new();
    let key = h.key.clone();
    let blocks = h.generate(5, |_, gen| {
        let tx = transfer(&key, gen, 10, vec![1, 2]);
        gen.add_tx(tx).unwrap();
    });
    let mut sub = h.bus.subscribe(EventFilter::all());

    assert_eq!(h.chain.insert_chain(&blocks), Ok(5));
    assert_eq!(h.chain.current_block().number(), 5);

    for number in 1..=5 {
        let block = h.chain.get_block_by_number(number).unwrap();
        let parent = h.chain.get_header_by_number(number - 1).unwrap();
        assert_eq!(block.parent_hash(), parent.hash());
    }

    let events = drain(&mut sub);
    assert_eq!(head_events(&events), 1);
    let new_logs: usize = events
        .iter()
        .map(|e| match e {
            ChainEvent::NewLogs(logs) => logs.len(),
            _ => 0,
        })
        .sum();
    assert_eq!(new_logs, 5);
}

#[test]
fn test_get_headers_skip_and_reverse() {
    let h = Harness::new();
    let blocks = h.generate(6, |_, _| {});
    h.chain.insert_chain(&blocks).unwrap();

    let numbers = |headers: Vec<shared_types::BlockHeader>| -> Vec<u64> {
        headers.iter().map(|header| header.number).collect()
    };
    assert_eq!(
        numbers(h.chain.get_headers(HashOrNumber::Number(1), 3, 0, false)),
        vec![1, 2, 3]
    );
    assert_eq!(
        numbers(h.chain.get_headers(HashOrNumber::Hash(blocks[5].hash()), 3, 1, true)),
        vec![6, 4, 2]
    );
    assert_eq!(
        numbers(h.chain.get_headers(HashOrNumber::Number(5), 10, 0, false)),
        vec![5, 6]
    );
    assert!(h
        .chain
        .get_headers(HashOrNumber::Hash([0xab; 32]), 1, 0, false)
        .is_empty());
}

#[test]
fn test_transaction_lookup_and_stamped_logs() {
    let h = Harness::new();
    let key = h.key.clone();
    let blocks = h.generate(2, |_, gen| {
        let tx = transfer(&key, gen, 10, vec![7]);
        gen.add_tx(tx).unwrap();
    });
    h.chain.insert_chain(&blocks).unwrap();

    let tx = &blocks[1].transactions[0];
    let (found, lookup) = h.chain.get_transaction(&tx.hash()).unwrap();
    assert_eq!(&found, tx);
    assert_eq!(lookup.block_number, 2);
    assert_eq!(lookup.block_hash, blocks[1].hash());
    assert_eq!(lookup.index, 0);

    let receipts = h.chain.get_receipts(&blocks[1].hash()).unwrap();
    let log = &receipts[0].logs[0];
    assert_eq!(log.block_hash, blocks[1].hash());
    assert_eq!(log.block_number, 2);
    assert_eq!(log.tx_hash, tx.hash());
}

#[test]
fn test_insert_known_blocks_is_noop() {
    let h = Harness::new();
    let blocks = h.generate(3, |_, _| {});
    h.chain.insert_chain(&blocks).unwrap();

    let mut sub = h.bus.subscribe(EventFilter::all());
    assert_eq!(h.chain.insert_chain(&blocks), Ok(3));
    assert!(drain(&mut sub).is_empty());
}

#[test]
fn test_insert_rejects_bad_state_root() {
    let h = Harness::new();
    let mut blocks = h.generate(2, |_, _| {});
    blocks[1].header.state_root = [0xde; 32];

    let err = h.chain.insert_chain(&blocks).unwrap_err();
    assert_eq!(err.index, 1);
    assert!(matches!(err.source, ChainError::StateRootMismatch { .. }));
    assert_eq!(h.chain.current_block().hash(), blocks[0].hash());
    assert!(!h.chain.has_block(&blocks[1].hash()));
}

#[test]
fn test_insert_rejects_body_mismatch() {
    let h = Harness::new();
    let key = h.key.clone();
    let mut blocks = h.generate(1, |_, gen| {
        let tx = transfer(&key, gen, 10, vec![]);
        gen.add_tx(tx).unwrap();
    });
    blocks[0].transactions.clear();

    let err = h.chain.insert_chain(&blocks).unwrap_err();
    assert_eq!(err.index, 0);
    assert_eq!(err.source, ChainError::BodyMismatch("transactions root"));
}

#[test]
fn test_insert_requires_known_parent() {
    let h = Harness::new();
    let blocks = h.generate(3, |_, _| {});

    let err = h.chain.insert_chain(&blocks[1..]).unwrap_err();
    assert_eq!(err.index, 0);
    assert_eq!(
        err.source,
        ChainError::UnknownAncestor(blocks[0].hash())
    );
}

#[test]
fn test_insert_rejects_gaps() {
    let h = Harness::new();
    let blocks = h.generate(3, |_, _| {});

    let err = h
        .chain
        .insert_chain(&[blocks[0].clone(), blocks[2].clone()])
        .unwrap_err();
    assert_eq!(err.index, 1);
    assert!(matches!(
        err.source,
        ChainError::NonContiguousInsert { prev: 1, number: 3 }
    ));
    assert_eq!(h.chain.current_block().number(), 0);
}

#[test]
fn test_partial_failure_still_announces_head() {
    let h = Harness::new();
    let mut blocks = h.generate(3, |_, _| {});
    blocks[2].header.gas_used = 1;
    let mut sub = h.bus.subscribe(EventFilter::all());

    let err = h.chain.insert_chain(&blocks).unwrap_err();
    assert_eq!(err.index, 2);
    assert_eq!(h.chain.current_block().number(), 2);
    assert_eq!(head_events(&drain(&mut sub)), 1);
}

// =============================================================================
// FORK CHOICE
// =============================================================================

#[test]
fn test_heavier_branch_reorgs_and_reports_side_blocks_once() {
    let h = Harness::new();
    let key = h.key.clone();
    let light = h.generate(3, |i, gen| {
        gen.set_coinbase([1u8; 20]);
        if i == 1 {
            let tx = transfer(&key, gen, 5, vec![9, 9]);
            gen.add_tx(tx).unwrap();
        }
    });
    let heavy = h.generate(3, |_, gen| {
        gen.set_coinbase([2u8; 20]);
        gen.set_difficulty(U256::from(2_000));
    });

    h.chain.insert_chain(&light).unwrap();
    let mut sub = h.bus.subscribe(EventFilter::all());
    h.chain.insert_chain(&heavy).unwrap();

    assert_eq!(h.chain.current_block().hash(), heavy[2].hash());
    for block in &heavy {
        assert_eq!(h.chain.canonical_hash(block.number()), Some(block.hash()));
    }

    let events = drain(&mut sub);
    let sides = side_counts(&events);
    for block in &light {
        assert_eq!(sides.get(&block.hash()), Some(&1));
        assert!(h.chain.has_block(&block.hash()));
    }
    assert_eq!(head_events(&events), 1);

    let removed: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            ChainEvent::RemovedLogs(logs) => Some(logs.clone()),
            _ => None,
        })
        .flatten()
        .collect();
    assert_eq!(removed.len(), 1);
    assert!(removed[0].removed);

    let orphaned = light[1].transactions[0].hash();
    assert!(h.chain.get_transaction(&orphaned).is_none());
}

#[test]
fn test_detached_blocks_precede_head_event() {
    let h = Harness::new();
    let light = h.generate(2, |_, gen| gen.set_coinbase([1u8; 20]));
    let heavy = h.generate(2, |_, gen| {
        gen.set_coinbase([2u8; 20]);
        gen.set_difficulty(U256::from(5_000));
    });
    h.chain.insert_chain(&light).unwrap();
    let mut sub = h.bus.subscribe(EventFilter::all());
    h.chain.insert_chain(&heavy).unwrap();

    let events = drain(&mut sub);
    let last_side = events
        .iter()
        .rposition(|e| matches!(e, ChainEvent::ChainSide(_)))
        .unwrap();
    let head = events
        .iter()
        .position(|e| matches!(e, ChainEvent::ChainHead(_)))
        .unwrap();
    assert!(last_side < head);
}

#[test]
fn test_lighter_branch_stays_on_side() {
    let h = Harness::new();
    let main = h.generate(3, |_, gen| gen.set_coinbase([1u8; 20]));
    let fork = h.generate(2, |_, gen| {
        gen.set_coinbase([2u8; 20]);
        gen.set_difficulty(U256::from(500));
    });
    h.chain.insert_chain(&main).unwrap();

    let mut sub = h.bus.subscribe(EventFilter::all());
    h.chain.insert_chain(&fork).unwrap();

    assert_eq!(h.chain.current_block().hash(), main[2].hash());
    let events = drain(&mut sub);
    assert_eq!(side_counts(&events).len(), 2);
    assert_eq!(head_events(&events), 0);
    assert!(h.chain.get_block(&fork[1].hash()).is_some());
}

#[test]
fn test_equal_td_prefers_lower_block() {
    let h = Harness::new();
    let long = h.generate(2, |_, gen| gen.set_coinbase([1u8; 20]));
    let short = h.generate(1, |_, gen| {
        gen.set_coinbase([2u8; 20]);
        gen.set_difficulty(U256::from(2_000));
    });
    h.chain.insert_chain(&long).unwrap();
    h.chain.insert_chain(&short).unwrap();

    assert_eq!(h.chain.current_block().hash(), short[0].hash());
    assert_eq!(h.chain.canonical_hash(2), None);
}

#[test]
fn test_equal_td_same_height_prefers_preserved_author() {
    let local = [7u8; 20];
    let h = Harness::with(
        Arc::new(BasicEngine::proof_of_work()),
        ChainConfig::for_testing().with_local_addresses(vec![local]),
    );
    let external = h.generate(1, |_, gen| gen.set_coinbase([1u8; 20]));
    let ours = h.generate(1, |_, gen| gen.set_coinbase(local));

    h.chain.insert_chain(&external).unwrap();
    h.chain.insert_chain(&ours).unwrap();
    assert_eq!(h.chain.current_block().hash(), ours[0].hash());

    // The preserved head is not replaced by an equal external block.
    let other = h.generate(1, |_, gen| gen.set_coinbase([3u8; 20]));
    h.chain.insert_chain(&other).unwrap();
    assert_eq!(h.chain.current_block().hash(), ours[0].hash());
}

#[test]
fn test_proof_of_authority_disables_preservation() {
    let local = [7u8; 20];
    let h = Harness::with(
        Arc::new(BasicEngine::proof_of_authority()),
        ChainConfig::for_testing().with_local_addresses(vec![local]),
    );
    let external = h.generate(1, |_, gen| gen.set_coinbase([1u8; 20]));
    let ours = h.generate(1, |_, gen| gen.set_coinbase(local));

    h.chain.insert_chain(&external).unwrap();
    h.chain.insert_chain(&ours).unwrap();
    assert_eq!(h.chain.current_block().hash(), external[0].hash());
}

// =============================================================================
// SET HEAD
// =============================================================================

#[test]
fn test_set_head_rewinds_and_keeps_side_data() {
    let h = Harness::new();
    let key = h.key.clone();
    let blocks = h.generate(5, |_, gen| {
        let tx = transfer(&key, gen, 1, vec![]);
        gen.add_tx(tx).unwrap();
    });
    h.chain.insert_chain(&blocks).unwrap();
    let mut sub = h.bus.subscribe(EventFilter::all());

    h.chain.set_head(2).unwrap();

    assert_eq!(h.chain.current_block().hash(), blocks[1].hash());
    assert_eq!(h.chain.current_fast_block().number(), 2);
    assert_eq!(h.chain.canonical_hash(3), None);
    assert!(h.chain.has_block(&blocks[4].hash()));
    assert!(h
        .chain
        .get_transaction(&blocks[3].transactions[0].hash())
        .is_none());
    assert_eq!(head_events(&drain(&mut sub)), 1);

    // Stored blocks above the new head can be re-imported.
    h.chain.insert_chain(&blocks[2..]).unwrap();
    assert_eq!(h.chain.current_block().hash(), blocks[4].hash());
    assert!(h
        .chain
        .get_transaction(&blocks[3].transactions[0].hash())
        .is_some());
}

// =============================================================================
// FAST SYNC
// =============================================================================

#[test]
fn test_receipt_chain_then_pivot_commit() {
    let source = Harness::new();
    let pairs = source.generate_with_receipts(4);
    let (blocks, receipts): (Vec<Block>, Vec<Vec<Receipt>>) = pairs.into_iter().unzip();
    source.chain.insert_chain(&blocks).unwrap();

    let h = Harness::new();
    assert_eq!(
        h.chain
            .insert_receipt_chain(&blocks[..3], receipts[..3].to_vec()),
        Ok(3)
    );
    assert_eq!(h.chain.current_block().number(), 0);
    assert_eq!(h.chain.current_fast_block().hash(), blocks[2].hash());
    assert_eq!(h.chain.canonical_hash(2), Some(blocks[1].hash()));
    assert!(h.chain.get_receipts(&blocks[1].hash()).is_some());

    let pivot = blocks[2].hash();
    assert_eq!(
        h.chain.commit_fast_sync_head(&pivot),
        Err(ChainError::MissingState(blocks[2].header.state_root))
    );

    let nodes = source
        .chain
        .state_at(&blocks[2].header.state_root)
        .unwrap()
        .commit()
        .nodes;
    h.chain.store_state_nodes(&nodes).unwrap();
    h.chain.commit_fast_sync_head(&pivot).unwrap();
    assert_eq!(h.chain.current_block().hash(), pivot);

    h.chain.insert_chain(&blocks[3..]).unwrap();
    assert_eq!(h.chain.current_block().hash(), blocks[3].hash());
}

#[test]
fn test_receipt_chain_rejects_bad_receipts() {
    let source = Harness::new();
    let pairs = source.generate_with_receipts(2);
    let (blocks, mut receipts): (Vec<Block>, Vec<Vec<Receipt>>) = pairs.into_iter().unzip();

    let h = Harness::new();
    let err = h
        .chain
        .insert_receipt_chain(&blocks, receipts[..1].to_vec())
        .unwrap_err();
    assert!(matches!(err.source, ChainError::ReceiptCountMismatch { .. }));

    receipts[1][0].gas_used += 1;
    let err = h.chain.insert_receipt_chain(&blocks, receipts).unwrap_err();
    assert_eq!(err.index, 1);
    assert!(matches!(err.source, ChainError::ReceiptsRootMismatch { .. }));
    assert_eq!(h.chain.current_fast_block().number(), 1);
}

// =============================================================================
// STATE
// =============================================================================

#[test]
fn test_state_reads() {
    let h = Harness::new();
    let missing = [0x42; 32];
    assert!(!h.chain.has_state(&missing));
    assert_eq!(
        h.chain.state_at(&missing),
        Err(ChainError::MissingState(missing))
    );

    let root = h.chain.genesis().header.state_root;
    let node = h.chain.get_state_node(&root).unwrap();
    assert_eq!(shared_types::keccak256(&node), root);
}

#[test]
fn test_replayed_execution_reproduces_roots() {
    let h = Harness::new();
    let key = h.key.clone();
    let blocks = h.generate(4, |_, gen| {
        for value in 0..2 {
            let tx = transfer(&key, gen, value, vec![value as u8 + 1]);
            gen.add_tx(tx).unwrap();
        }
    });
    h.chain.insert_chain(&blocks).unwrap();

    for block in &blocks {
        let parent = h.chain.get_header(&block.parent_hash()).unwrap();
        let mut state = h.chain.state_at(&parent.state_root).unwrap();
        let receipts = h.chain.execute(block, &mut state).unwrap();
        h.engine
            .finalize(&block.header, &mut state, &block.uncles)
            .unwrap();
        assert_eq!(state.root(), block.header.state_root);
        assert_eq!(
            shared_types::receipts_root(&receipts),
            block.header.receipts_root
        );
    }
}
