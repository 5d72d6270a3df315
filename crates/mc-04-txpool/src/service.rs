//! # Transaction Pool Service
//!
//! Validates submissions against the head state, keeps the pending set in
//! step with the chain and announces newly executable transactions.

use crate::config::TxPoolConfig;
use crate::domain::{PendingSet, PoolError};
use crate::ports::PoolChain;
use mc_03_blockchain::WorldState;
use parking_lot::RwLock;
use shared_bus::{ChainEvent, EventPublisher, Subscription, SubscriptionError};
use shared_types::{Address, BlockHeader, Hash, SenderRecovery, Transaction, U256};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pool size summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub pending: usize,
    pub queued: usize,
}

struct PoolInner {
    head: BlockHeader,
    state: WorldState,
    set: PendingSet,
}

/// Pending transaction pool.
pub struct TxPool {
    chain: Arc<dyn PoolChain>,
    recovery: Arc<dyn SenderRecovery>,
    events: Arc<dyn EventPublisher>,
    inner: RwLock<PoolInner>,
}

impl TxPool {
    /// Create a pool validating against the current chain head.
    pub fn new(
        config: TxPoolConfig,
        chain: Arc<dyn PoolChain>,
        recovery: Arc<dyn SenderRecovery>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        let head = chain.current_header();
        let state = chain.state_at(&head.state_root).unwrap_or_else(|| {
            warn!(number = head.number, "Head state missing, validating against empty state");
            WorldState::new()
        });
        Self {
            chain,
            recovery,
            events,
            inner: RwLock::new(PoolInner {
                head,
                state,
                set: PendingSet::new(config),
            }),
        }
    }

    // =========================================================================
    // SUBMISSION
    // =========================================================================

    /// Add a transaction from this node. Its sender becomes local.
    pub fn add_local(&self, tx: Transaction) -> Result<Hash, PoolError> {
        self.add(tx, true)
    }

    /// Add a transaction received from the network.
    pub fn add_remote(&self, tx: Transaction) -> Result<Hash, PoolError> {
        self.add(tx, false)
    }

    /// Add network transactions, one result per input.
    pub fn add_remotes(&self, txs: Vec<Transaction>) -> Vec<Result<Hash, PoolError>> {
        let mut promoted = Vec::new();
        let results: Vec<Result<Hash, PoolError>> = {
            let mut inner = self.inner.write();
            txs.into_iter()
                .map(|tx| {
                    let (hash, executable) = self.admit(&mut inner, tx, false)?;
                    promoted.extend(executable);
                    Ok(hash)
                })
                .collect()
        };
        self.announce(promoted);
        results
    }

    fn add(&self, tx: Transaction, local: bool) -> Result<Hash, PoolError> {
        let (hash, promoted) = {
            let mut inner = self.inner.write();
            self.admit(&mut inner, tx, local)?
        };
        self.announce(promoted);
        Ok(hash)
    }

    /// Validate and insert under the write lock.
    fn admit(
        &self,
        inner: &mut PoolInner,
        tx: Transaction,
        local: bool,
    ) -> Result<(Hash, Vec<Transaction>), PoolError> {
        let sender = self.validate(inner, &tx, local)?;
        let hash = tx.hash();
        let PoolInner { state, set, .. } = inner;
        let promoted = set.insert(tx, sender, local, state)?;
        if local {
            set.mark_local(sender);
        }
        debug!(
            hash = %hex::encode(hash),
            sender = %hex::encode(sender),
            local,
            "Transaction admitted"
        );
        Ok((hash, promoted))
    }

    fn validate(
        &self,
        inner: &PoolInner,
        tx: &Transaction,
        local: bool,
    ) -> Result<Address, PoolError> {
        let config = inner.set.config();

        let size = tx.size();
        if size > config.max_tx_size {
            return Err(PoolError::OversizedData {
                size,
                max: config.max_tx_size,
            });
        }
        if tx.gas_limit > inner.head.gas_limit {
            return Err(PoolError::GasLimit {
                gas: tx.gas_limit,
                limit: inner.head.gas_limit,
            });
        }

        let sender = self.recovery.recover_sender(tx)?;
        let local = local || inner.set.is_local(&sender);
        if !local && tx.gas_price < U256::from(config.price_limit) {
            return Err(PoolError::Underpriced);
        }

        let account = inner.state.account(&sender);
        if tx.nonce < account.nonce {
            return Err(PoolError::NonceTooLow {
                expected: account.nonce,
                got: tx.nonce,
            });
        }
        let cost = tx.cost();
        if cost > account.balance {
            return Err(PoolError::InsufficientFunds {
                balance: account.balance,
                cost,
            });
        }
        let needed = tx.intrinsic_gas();
        if tx.gas_limit < needed {
            return Err(PoolError::IntrinsicGas {
                needed,
                limit: tx.gas_limit,
            });
        }

        let hash = tx.hash();
        if inner.set.contains(&hash) {
            return Err(PoolError::AlreadyKnown(hash));
        }
        Ok(sender)
    }

    fn announce(&self, promoted: Vec<Transaction>) {
        if !promoted.is_empty() {
            self.events
                .publish(ChainEvent::NewPendingTransactions(promoted));
        }
    }

    // =========================================================================
    // HEAD CHANGES
    // =========================================================================

    /// Move the pool onto `new_head`.
    ///
    /// When `old_head` is not the parent of `new_head`, transactions from
    /// the abandoned branch that the new branch lacks are added back.
    pub fn reset(&self, old_head: Option<&BlockHeader>, new_head: &BlockHeader) {
        let reinject = match old_head {
            Some(old) if old.hash() != new_head.parent_hash && old.hash() != new_head.hash() => {
                self.discarded_transactions(old, new_head)
            }
            _ => Vec::new(),
        };

        let Some(state) = self.chain.state_at(&new_head.state_root) else {
            warn!(
                number = new_head.number,
                "New head state missing, pool reset skipped"
            );
            return;
        };

        let mut promoted = Vec::new();
        {
            let mut inner = self.inner.write();
            inner.head = new_head.clone();
            inner.state = state;
            let PoolInner { state, set, .. } = &mut *inner;
            promoted.extend(set.reset(state));

            let reinjected = reinject.len();
            let mut readded = 0usize;
            for tx in reinject {
                match self.admit(&mut inner, tx, false) {
                    Ok((_, executable)) => {
                        readded += 1;
                        promoted.extend(executable);
                    }
                    Err(e) => debug!(error = %e, "Discarded transaction not re-added"),
                }
            }
            if reinjected > 0 {
                info!(reinjected, readded, "Re-injected transactions from reorg");
            }
            debug!(
                number = new_head.number,
                pending = inner.set.pending_len(),
                queued = inner.set.queued_len(),
                "Pool reset"
            );
        }
        self.announce(promoted);
    }

    /// Transactions on the `old` branch but not on the `new` one, oldest first.
    fn discarded_transactions(&self, old: &BlockHeader, new: &BlockHeader) -> Vec<Transaction> {
        let max_depth = self.inner.read().set.config().max_reorg_depth;
        if old.number.abs_diff(new.number) > max_depth {
            warn!(
                old = old.number,
                new = new.number,
                "Reorg too deep, skipping re-injection"
            );
            return Vec::new();
        }

        let (Some(mut rem), Some(mut add)) = (
            self.chain.get_block(&old.hash()),
            self.chain.get_block(&new.hash()),
        ) else {
            warn!("Reorg endpoints missing, skipping re-injection");
            return Vec::new();
        };

        let mut discarded = Vec::new();
        let mut included = HashSet::new();
        let mut steps = 0u64;
        while rem.hash() != add.hash() {
            if steps > 2 * max_depth {
                warn!("Reorg ancestor beyond depth limit, skipping re-injection");
                return Vec::new();
            }
            steps += 1;

            let step_rem = rem.number() >= add.number();
            let step_add = add.number() >= rem.number();
            if step_rem {
                discarded.extend(rem.transactions.iter().rev().cloned());
                let Some(parent) = self.chain.get_block(&rem.parent_hash()) else {
                    warn!(number = rem.number(), "Missing ancestor on old branch");
                    return Vec::new();
                };
                rem = parent;
            }
            if step_add {
                included.extend(add.transactions.iter().map(Transaction::hash));
                let Some(parent) = self.chain.get_block(&add.parent_hash()) else {
                    warn!(number = add.number(), "Missing ancestor on new branch");
                    return Vec::new();
                };
                add = parent;
            }
        }

        discarded.reverse();
        discarded.retain(|tx| !included.contains(&tx.hash()));
        discarded
    }

    /// Follow `ChainHead` events until cancelled or the bus closes.
    pub async fn run(self: Arc<Self>, mut heads: Subscription, cancel: CancellationToken) {
        info!("Transaction pool reset loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = heads.recv() => match event {
                    Ok(ChainEvent::ChainHead(header)) => {
                        let old = self.head();
                        self.reset(Some(&old), &header);
                    }
                    Ok(_) => {}
                    Err(SubscriptionError::Lagged(missed)) => {
                        warn!(missed, "Pool missed head events, resetting to current head");
                        let old = self.head();
                        let current = self.chain.current_header();
                        self.reset(Some(&old), &current);
                    }
                    Err(SubscriptionError::Closed) => break,
                },
            }
        }
        heads.unsubscribe();
        info!("Transaction pool reset loop stopped");
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Executable transactions per sender, nonce ordered.
    pub fn pending(&self) -> BTreeMap<Address, Vec<Transaction>> {
        self.inner.read().set.pending()
    }

    /// Executable and future transactions per sender.
    pub fn content(
        &self,
    ) -> (
        BTreeMap<Address, Vec<Transaction>>,
        BTreeMap<Address, Vec<Transaction>>,
    ) {
        let inner = self.inner.read();
        (inner.set.pending(), inner.set.queued())
    }

    pub fn get(&self, hash: &Hash) -> Option<Transaction> {
        self.inner.read().set.get(hash).map(|entry| entry.tx.clone())
    }

    pub fn has(&self, hash: &Hash) -> bool {
        self.inner.read().set.contains(hash)
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.read();
        PoolStats {
            pending: inner.set.pending_len(),
            queued: inner.set.queued_len(),
        }
    }

    pub fn locals(&self) -> Vec<Address> {
        self.inner.read().set.locals()
    }

    /// Next nonce for `address` counting its executable transactions.
    pub fn nonce(&self, address: &Address) -> u64 {
        let inner = self.inner.read();
        inner.set.pending_nonce(address, &inner.state)
    }

    /// Head the pool last validated against.
    pub fn head(&self) -> BlockHeader {
        self.inner.read().head.clone()
    }
}
