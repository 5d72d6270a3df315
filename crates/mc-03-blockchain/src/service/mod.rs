//! # BlockChain Service
//!
//! The canonical chain ledger. `BlockChain` is the only writer of canonical
//! mappings and head pointers.
//!
//! ## Concurrency
//!
//! - Writers (`insert_chain`, `insert_receipt_chain`, `set_head`,
//!   `commit_fast_sync_head`) serialize on one mutex.
//! - The head pointers are `ArcSwap`s: readers never block and always see a
//!   head whose data was durably written before the swap.
//! - Every write is one atomic store batch, so a crash leaves the store at the
//!   last completed batch.

mod fast_sync;
mod insert;

#[cfg(test)]
mod tests;

use crate::config::ChainConfig;
use crate::domain::schema::{
    body_key, canonical_key, decode, encode, header_key, number_key, receipts_key,
    state_key, td_key, tx_lookup_key, TxLookup, HEAD_BLOCK_KEY, HEAD_FAST_KEY,
};
use crate::domain::{ChainError, Genesis, WorldState};
use crate::ports::{BatchOperation, ConsensusEngine, EngineKind, ExecutionEngine, KeyValueStore};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use shared_bus::{ChainEvent, EventPublisher};
use shared_types::trie::TrieNode;
use shared_types::{
    Account, Address, Block, BlockBody, BlockHeader, Hash, HashOrNumber, Receipt, Transaction,
    U256,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// The canonical chain ledger.
pub struct BlockChain {
    db: Arc<dyn KeyValueStore>,
    engine: Arc<dyn ConsensusEngine>,
    executor: Arc<dyn ExecutionEngine>,
    events: Arc<dyn EventPublisher>,
    config: ChainConfig,
    genesis: Block,
    head: ArcSwap<Block>,
    fast_head: ArcSwap<Block>,
    insert_lock: Mutex<()>,
}

impl BlockChain {
    /// Open the chain stored in `db`, committing `genesis` on first use.
    ///
    /// If the stored head has no state the chain rewinds to the nearest
    /// ancestor that does.
    pub fn new(
        db: Arc<dyn KeyValueStore>,
        genesis: &Genesis,
        engine: Arc<dyn ConsensusEngine>,
        executor: Arc<dyn ExecutionEngine>,
        events: Arc<dyn EventPublisher>,
        config: ChainConfig,
    ) -> Result<Self, ChainError> {
        let genesis_block = genesis.to_block();
        let genesis_hash = genesis_block.hash();

        match read::<Hash>(db.as_ref(), &canonical_key(0))? {
            Some(stored) if stored != genesis_hash => {
                return Err(ChainError::GenesisMismatch {
                    stored,
                    configured: genesis_hash,
                });
            }
            Some(_) => {}
            None => {
                write_genesis(db.as_ref(), genesis, &genesis_block)?;
                info!(hash = %hex::encode(genesis_hash), "Wrote genesis block");
            }
        }

        let head = load_block_at_key(db.as_ref(), HEAD_BLOCK_KEY)?
            .unwrap_or_else(|| genesis_block.clone());
        let fast_head =
            load_block_at_key(db.as_ref(), HEAD_FAST_KEY)?.unwrap_or_else(|| head.clone());

        let chain = Self {
            db,
            engine,
            executor,
            events,
            config,
            genesis: genesis_block,
            head: ArcSwap::from_pointee(head),
            fast_head: ArcSwap::from_pointee(fast_head),
            insert_lock: Mutex::new(()),
        };

        let head = chain.current_block();
        if !chain.has_state(&head.header.state_root) {
            warn!(number = head.number(), "Head state missing, rewinding");
            chain.set_head(head.number())?;
        }

        let head = chain.current_block();
        info!(
            number = head.number(),
            hash = %hex::encode(head.hash()),
            fast = chain.current_fast_block().number(),
            "Loaded chain head"
        );
        Ok(chain)
    }

    // =========================================================================
    // HEAD READS
    // =========================================================================

    /// The head block. Lock-free.
    pub fn current_block(&self) -> Arc<Block> {
        self.head.load_full()
    }

    pub fn current_header(&self) -> BlockHeader {
        self.head.load().header.clone()
    }

    /// Highest block imported with receipts, with or without state.
    pub fn current_fast_block(&self) -> Arc<Block> {
        self.fast_head.load_full()
    }

    /// Total difficulty of the head block.
    pub fn current_td(&self) -> U256 {
        let head = self.head.load();
        self.get_td(&head.hash()).unwrap_or_default()
    }

    pub fn genesis(&self) -> &Block {
        &self.genesis
    }

    pub fn engine(&self) -> &Arc<dyn ConsensusEngine> {
        &self.engine
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    // =========================================================================
    // BLOCK READS
    // =========================================================================

    pub fn get_block(&self, hash: &Hash) -> Option<Block> {
        logged(self.read_block_by_hash(hash))
    }

    pub fn get_block_by_number(&self, number: u64) -> Option<Block> {
        let hash = self.canonical_hash(number)?;
        self.get_block(&hash)
    }

    pub fn get_header(&self, hash: &Hash) -> Option<BlockHeader> {
        logged(self.read_header_by_hash(hash))
    }

    pub fn get_header_by_number(&self, number: u64) -> Option<BlockHeader> {
        let hash = self.canonical_hash(number)?;
        self.get_header(&hash)
    }

    /// Up to `amount` headers from `origin`, stepping `skip + 1` canonical
    /// numbers forward or backward. Stops at the first gap.
    pub fn get_headers(
        &self,
        origin: HashOrNumber,
        amount: u64,
        skip: u64,
        reverse: bool,
    ) -> Vec<BlockHeader> {
        let first = match origin {
            HashOrNumber::Hash(hash) => self.get_header(&hash),
            HashOrNumber::Number(number) => self.get_header_by_number(number),
        };
        let step = skip.saturating_add(1);
        let mut headers = Vec::new();
        let mut next = first;
        while let Some(header) = next {
            if headers.len() as u64 >= amount {
                break;
            }
            let number = header.number;
            headers.push(header);
            next = if reverse {
                number.checked_sub(step)
            } else {
                number.checked_add(step)
            }
            .and_then(|n| self.get_header_by_number(n));
        }
        headers
    }

    pub fn get_body(&self, hash: &Hash) -> Option<BlockBody> {
        let number = self.block_number(hash)?;
        logged(self.read(&body_key(number, hash)))
    }

    pub fn get_receipts(&self, hash: &Hash) -> Option<Vec<Receipt>> {
        let number = self.block_number(hash)?;
        logged(self.read(&receipts_key(number, hash)))
    }

    pub fn get_td(&self, hash: &Hash) -> Option<U256> {
        let number = self.block_number(hash)?;
        logged(self.read(&td_key(number, hash)))
    }

    /// Whether the header and body of `hash` are stored.
    pub fn has_block(&self, hash: &Hash) -> bool {
        let Some(number) = self.block_number(hash) else {
            return false;
        };
        logged(self.exists(&body_key(number, hash)).map(Some)).unwrap_or(false)
    }

    /// Canonical block hash at `number`.
    pub fn canonical_hash(&self, number: u64) -> Option<Hash> {
        logged(self.read(&canonical_key(number)))
    }

    /// A canonical transaction and its position.
    pub fn get_transaction(&self, hash: &Hash) -> Option<(Transaction, TxLookup)> {
        let lookup: TxLookup = logged(self.read(&tx_lookup_key(hash)))?;
        if self.canonical_hash(lookup.block_number) != Some(lookup.block_hash) {
            return None;
        }
        let body = self.get_body(&lookup.block_hash)?;
        let tx = body.transactions.get(lookup.index as usize)?.clone();
        Some((tx, lookup))
    }

    // =========================================================================
    // STATE READS
    // =========================================================================

    /// Whether the state trie under `root` is fully stored.
    pub fn has_state(&self, root: &Hash) -> bool {
        let Some(bytes) = self.get_state_node(root) else {
            return false;
        };
        let Ok(node) = TrieNode::decode(&bytes) else {
            return false;
        };
        node.children()
            .iter()
            .all(|child| logged(self.exists(&state_key(child)).map(Some)).unwrap_or(false))
    }

    /// Load the full account state under `root`.
    pub fn state_at(&self, root: &Hash) -> Result<WorldState, ChainError> {
        let node = self.read_state_node(root)?;
        let TrieNode::Branch { .. } = node else {
            return Err(ChainError::Codec("state root is not a branch node".into()));
        };
        let mut accounts = BTreeMap::new();
        for child in node.children() {
            match self.read_state_node(&child) {
                Ok(TrieNode::Leaf { accounts: entries }) => accounts.extend(entries),
                Ok(TrieNode::Branch { .. }) => {
                    return Err(ChainError::Codec("nested branch in state trie".into()))
                }
                Err(ChainError::MissingState(_)) => return Err(ChainError::MissingState(*root)),
                Err(e) => return Err(e),
            }
        }
        Ok(WorldState::from_accounts(accounts))
    }

    /// One account under `root`, or `None` if that state is not stored.
    pub fn account(&self, root: &Hash, address: &Address) -> Option<Account> {
        logged(self.state_at(root).map(|state| Some(state.account(address))))
    }

    /// Encoded state trie node by hash.
    pub fn get_state_node(&self, hash: &Hash) -> Option<Vec<u8>> {
        logged(
            self.db
                .get(&state_key(hash))
                .map_err(ChainError::from),
        )
    }

    /// Store verified state trie nodes delivered by state sync.
    pub fn store_state_nodes(&self, nodes: &[(Hash, Vec<u8>)]) -> Result<(), ChainError> {
        let ops = nodes
            .iter()
            .map(|(hash, bytes)| BatchOperation::put(state_key(hash), bytes.clone()))
            .collect();
        self.db.atomic_batch_write(ops)?;
        Ok(())
    }

    // =========================================================================
    // INTERNAL
    // =========================================================================

    fn read<T: DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, ChainError> {
        read(self.db.as_ref(), key)
    }

    fn exists(&self, key: &[u8]) -> Result<bool, ChainError> {
        Ok(self.db.exists(key)?)
    }

    fn block_number(&self, hash: &Hash) -> Option<u64> {
        logged(self.read(&number_key(hash)))
    }

    fn read_header(&self, number: u64, hash: &Hash) -> Result<Option<BlockHeader>, ChainError> {
        self.read(&header_key(number, hash))
    }

    fn read_header_by_hash(&self, hash: &Hash) -> Result<Option<BlockHeader>, ChainError> {
        match self.read::<u64>(&number_key(hash))? {
            Some(number) => self.read_header(number, hash),
            None => Ok(None),
        }
    }

    fn read_block_by_hash(&self, hash: &Hash) -> Result<Option<Block>, ChainError> {
        read_block(self.db.as_ref(), hash)
    }

    /// Block that must exist, such as the parent of a stored block.
    fn require_block(&self, hash: &Hash) -> Result<Block, ChainError> {
        self.read_block_by_hash(hash)?
            .ok_or(ChainError::UnknownBlock(*hash))
    }

    fn require_td(&self, header: &BlockHeader) -> Result<U256, ChainError> {
        let hash = header.hash();
        self.read(&td_key(header.number, &hash))?
            .ok_or(ChainError::UnknownBlock(hash))
    }

    fn read_state_node(&self, hash: &Hash) -> Result<TrieNode, ChainError> {
        let bytes = self
            .db
            .get(&state_key(hash))?
            .ok_or(ChainError::MissingState(*hash))?;
        TrieNode::decode(&bytes).map_err(|e| ChainError::Codec(e.to_string()))
    }

    /// Author rule for equal-weight fork choice.
    fn should_preserve(&self, header: &BlockHeader) -> bool {
        if self.engine.descriptor().kind == EngineKind::ProofOfAuthority {
            return false;
        }
        match self.engine.author(header) {
            Ok(author) => self.config.local_addresses.contains(&author),
            Err(_) => false,
        }
    }

    fn publish(&self, event: ChainEvent) {
        self.events.publish(event);
    }
}

fn read<T: DeserializeOwned>(db: &dyn KeyValueStore, key: &[u8]) -> Result<Option<T>, ChainError> {
    match db.get(key)? {
        Some(bytes) => decode(&bytes).map(Some),
        None => Ok(None),
    }
}

fn read_block(db: &dyn KeyValueStore, hash: &Hash) -> Result<Option<Block>, ChainError> {
    let Some(number) = read::<u64>(db, &number_key(hash))? else {
        return Ok(None);
    };
    let header = read::<BlockHeader>(db, &header_key(number, hash))?;
    let body = read::<BlockBody>(db, &body_key(number, hash))?;
    Ok(match (header, body) {
        (Some(header), Some(body)) => Some(Block::new(header, body)),
        _ => None,
    })
}

fn load_block_at_key(db: &dyn KeyValueStore, key: &[u8]) -> Result<Option<Block>, ChainError> {
    match read::<Hash>(db, key)? {
        Some(hash) => read_block(db, &hash),
        None => Ok(None),
    }
}

fn write_genesis(db: &dyn KeyValueStore, genesis: &Genesis, block: &Block) -> Result<(), ChainError> {
    let hash = block.hash();
    let commitment = genesis.state().commit();
    let mut ops = vec![
        BatchOperation::put(header_key(0, &hash), encode(&block.header)?),
        BatchOperation::put(body_key(0, &hash), encode(&block.body())?),
        BatchOperation::put(receipts_key(0, &hash), encode(&Vec::<Receipt>::new())?),
        BatchOperation::put(td_key(0, &hash), encode(&block.header.difficulty)?),
        BatchOperation::put(number_key(&hash), encode(&0u64)?),
        BatchOperation::put(canonical_key(0), encode(&hash)?),
        BatchOperation::put(HEAD_BLOCK_KEY, encode(&hash)?),
        BatchOperation::put(HEAD_FAST_KEY, encode(&hash)?),
    ];
    ops.extend(
        commitment
            .nodes
            .into_iter()
            .map(|(node_hash, bytes)| BatchOperation::put(state_key(&node_hash), bytes)),
    );
    db.atomic_batch_write(ops)?;
    Ok(())
}

/// Flatten a read for the public `Option` API, logging storage failures.
fn logged<T>(result: Result<Option<T>, ChainError>) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "Chain read failed");
            None
        }
    }
}

/// Fill the position fields of every log in `receipts`.
pub(crate) fn stamp_logs(block: &Block, hash: &Hash, receipts: &mut [Receipt]) {
    for (index, (receipt, tx)) in receipts.iter_mut().zip(&block.transactions).enumerate() {
        let tx_hash = tx.hash();
        for log in &mut receipt.logs {
            log.block_hash = *hash;
            log.block_number = block.number();
            log.tx_hash = tx_hash;
            log.tx_index = index as u32;
        }
    }
}

/// Lookup entries for every transaction of a canonical block.
pub(crate) fn tx_lookup_ops(block: &Block, hash: &Hash) -> Result<Vec<BatchOperation>, ChainError> {
    block
        .transactions
        .iter()
        .enumerate()
        .map(|(index, tx)| {
            let lookup = TxLookup {
                block_hash: *hash,
                block_number: block.number(),
                index: index as u32,
            };
            Ok(BatchOperation::put(tx_lookup_key(&tx.hash()), encode(&lookup)?))
        })
        .collect()
}
