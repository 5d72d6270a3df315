//! # Pending Transaction Set
//!
//! Per-sender nonce-ordered lists, split into executable and future
//! transactions.
//!
//! ## Data Structures
//!
//! - `all`: lookup by transaction hash
//! - `pending`: per sender, nonces contiguous from the account nonce
//! - `queue`: per sender, nonces with a gap before them
//! - `priced`: remote transactions by price, for eviction
//!
//! ## Invariants
//!
//! - A hash is in `all` iff it is in exactly one of `pending` or `queue`.
//! - `priced` holds exactly the non-local entries of `all`.
//! - After `reset`, every pending list starts at its sender's account nonce.

use super::errors::PoolError;
use super::priced::PricedTransaction;
use crate::config::TxPoolConfig;
use mc_03_blockchain::WorldState;
use shared_types::{Address, Hash, Transaction, U256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

type NonceList = BTreeMap<u64, Hash>;

/// A transaction held by the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PooledTx {
    pub tx: Transaction,
    pub hash: Hash,
    pub sender: Address,
    /// Local transactions are never price-evicted.
    pub local: bool,
    pub seq: u64,
}

impl PooledTx {
    fn priced(&self) -> PricedTransaction {
        PricedTransaction::new(self.tx.gas_price, self.hash, self.seq)
    }
}

/// Pool contents and the admission rules that depend on them.
#[derive(Debug)]
pub struct PendingSet {
    config: TxPoolConfig,
    all: HashMap<Hash, PooledTx>,
    pending: HashMap<Address, NonceList>,
    queue: HashMap<Address, NonceList>,
    priced: BTreeSet<PricedTransaction>,
    locals: HashSet<Address>,
    next_seq: u64,
}

impl PendingSet {
    pub fn new(config: TxPoolConfig) -> Self {
        let locals = config.locals.iter().copied().collect();
        Self {
            config,
            all: HashMap::new(),
            pending: HashMap::new(),
            queue: HashMap::new(),
            priced: BTreeSet::new(),
            locals,
            next_seq: 0,
        }
    }

    pub fn config(&self) -> &TxPoolConfig {
        &self.config
    }

    pub fn is_local(&self, address: &Address) -> bool {
        self.locals.contains(address)
    }

    pub fn mark_local(&mut self, address: Address) {
        self.locals.insert(address);
    }

    /// Local accounts, sorted.
    pub fn locals(&self) -> Vec<Address> {
        let mut locals: Vec<_> = self.locals.iter().copied().collect();
        locals.sort_unstable();
        locals
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.all.contains_key(hash)
    }

    pub fn get(&self, hash: &Hash) -> Option<&PooledTx> {
        self.all.get(hash)
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.values().map(BTreeMap::len).sum()
    }

    pub fn queued_len(&self) -> usize {
        self.queue.values().map(BTreeMap::len).sum()
    }

    pub fn remote_len(&self) -> usize {
        self.priced.len()
    }

    pub fn local_len(&self) -> usize {
        self.all.len() - self.priced.len()
    }

    /// Executable transactions per sender, nonce ordered.
    pub fn pending(&self) -> BTreeMap<Address, Vec<Transaction>> {
        self.collect(&self.pending)
    }

    /// Future transactions per sender, nonce ordered.
    pub fn queued(&self) -> BTreeMap<Address, Vec<Transaction>> {
        self.collect(&self.queue)
    }

    /// Next nonce `sender` can use on top of its executable transactions.
    pub fn pending_nonce(&self, sender: &Address, state: &WorldState) -> u64 {
        self.pending
            .get(sender)
            .and_then(|list| list.keys().next_back())
            .map_or_else(|| state.nonce(sender), |nonce| nonce + 1)
    }

    /// Insert a transaction that passed stateless and account validation.
    ///
    /// Returns the transactions that became executable.
    pub fn insert(
        &mut self,
        tx: Transaction,
        sender: Address,
        local: bool,
        state: &WorldState,
    ) -> Result<Vec<Transaction>, PoolError> {
        let hash = tx.hash();
        let nonce = tx.nonce;
        let local = local || self.locals.contains(&sender);

        if let Some(old_hash) = self.slot(&sender, nonce) {
            let old_price = self
                .all
                .get(&old_hash)
                .map(|entry| entry.tx.gas_price)
                .unwrap_or_default();
            if !self.outbids(old_price, tx.gas_price) {
                return Err(PoolError::Underpriced);
            }
            let executable = self
                .pending
                .get(&sender)
                .is_some_and(|list| list.contains_key(&nonce));
            self.forget(&old_hash);
            self.track(tx.clone(), hash, sender, local);
            let lists = if executable {
                &mut self.pending
            } else {
                &mut self.queue
            };
            lists.entry(sender).or_default().insert(nonce, hash);
            return Ok(if executable { vec![tx] } else { Vec::new() });
        }

        if local {
            if self.local_len() >= self.config.local_capacity {
                return Err(PoolError::PoolFull {
                    capacity: self.config.local_capacity,
                });
            }
        } else if let Some(victim) = self.eviction_victim(&sender, tx.gas_price)? {
            self.remove(&victim);
        }

        self.track(tx, hash, sender, local);
        self.queue.entry(sender).or_default().insert(nonce, hash);
        Ok(self.promote(&sender, state))
    }

    /// Remove a transaction. Later nonces of the same sender lose
    /// executability and move to the queue.
    pub fn remove(&mut self, hash: &Hash) -> Option<PooledTx> {
        let entry = self.forget(hash)?;
        let (sender, nonce) = (entry.sender, entry.tx.nonce);

        if let Some(list) = self.pending.get_mut(&sender) {
            if list.get(&nonce) == Some(hash) {
                list.remove(&nonce);
                let tail = list.split_off(&nonce);
                let emptied = list.is_empty();
                if !tail.is_empty() {
                    self.queue.entry(sender).or_default().extend(tail);
                }
                if emptied {
                    self.pending.remove(&sender);
                }
                return Some(entry);
            }
        }
        if let Some(list) = self.queue.get_mut(&sender) {
            list.remove(&nonce);
            if list.is_empty() {
                self.queue.remove(&sender);
            }
        }
        Some(entry)
    }

    /// Revalidate every sender against a new head state.
    ///
    /// Drops stale-nonce and unaffordable transactions, demotes pending ones
    /// that lost executability and promotes queued ones that gained it.
    pub fn reset(&mut self, state: &WorldState) -> Vec<Transaction> {
        let senders: BTreeSet<Address> = self
            .pending
            .keys()
            .chain(self.queue.keys())
            .copied()
            .collect();

        for sender in &senders {
            self.demote_unexecutables(sender, state);
        }
        let mut promoted = Vec::new();
        for sender in &senders {
            promoted.extend(self.promote(sender, state));
        }
        promoted
    }

    // =========================================================================
    // INTERNAL
    // =========================================================================

    fn slot(&self, sender: &Address, nonce: u64) -> Option<Hash> {
        self.pending
            .get(sender)
            .and_then(|list| list.get(&nonce))
            .or_else(|| self.queue.get(sender).and_then(|list| list.get(&nonce)))
            .copied()
    }

    /// A replacement must be strictly more expensive and clear the bump.
    fn outbids(&self, old: U256, new: U256) -> bool {
        let bump_multiplier = U256::from(100 + self.config.price_bump);
        let threshold = old.saturating_mul(bump_multiplier) / U256::from(100);
        new > old && new >= threshold
    }

    /// Decide which remote transaction, if any, makes room for a new one.
    ///
    /// Nothing is evicted here so a rejected transaction leaves the pool intact.
    fn eviction_victim(&self, sender: &Address, price: U256) -> Result<Option<Hash>, PoolError> {
        let sender_count = self.pending.get(sender).map_or(0, BTreeMap::len)
            + self.queue.get(sender).map_or(0, BTreeMap::len);
        if sender_count >= self.config.account_capacity() {
            return match self.cheapest_queued(sender) {
                Some((hash, cheapest)) if price > cheapest => Ok(Some(hash)),
                _ => Err(PoolError::AccountLimitReached {
                    limit: self.config.account_capacity(),
                }),
            };
        }

        if self.priced.len() >= self.config.global_capacity() {
            return match self.priced.last() {
                Some(cheapest) if price > cheapest.gas_price => Ok(Some(cheapest.hash)),
                _ => Err(PoolError::Underpriced),
            };
        }
        Ok(None)
    }

    fn cheapest_queued(&self, sender: &Address) -> Option<(Hash, U256)> {
        self.queue
            .get(sender)?
            .values()
            .filter_map(|hash| self.all.get(hash))
            .filter(|entry| !entry.local)
            .min_by_key(|entry| entry.tx.gas_price)
            .map(|entry| (entry.hash, entry.tx.gas_price))
    }

    fn track(&mut self, tx: Transaction, hash: Hash, sender: Address, local: bool) {
        let entry = PooledTx {
            tx,
            hash,
            sender,
            local,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        if !local {
            self.priced.insert(entry.priced());
        }
        self.all.insert(hash, entry);
    }

    /// Drop from the lookup and price indexes, leaving nonce lists alone.
    fn forget(&mut self, hash: &Hash) -> Option<PooledTx> {
        let entry = self.all.remove(hash)?;
        self.priced.remove(&entry.priced());
        Some(entry)
    }

    fn promote(&mut self, sender: &Address, state: &WorldState) -> Vec<Transaction> {
        let mut next = self.pending_nonce(sender, state);
        let mut promoted = Vec::new();
        let Some(queued) = self.queue.get_mut(sender) else {
            return promoted;
        };
        while let Some(hash) = queued.remove(&next) {
            self.pending.entry(*sender).or_default().insert(next, hash);
            if let Some(entry) = self.all.get(&hash) {
                promoted.push(entry.tx.clone());
            }
            next += 1;
        }
        if queued.is_empty() {
            self.queue.remove(sender);
        }
        promoted
    }

    fn demote_unexecutables(&mut self, sender: &Address, state: &WorldState) {
        let nonce = state.nonce(sender);
        let balance = state.balance(sender);
        let mut dropped = Vec::new();

        if let Some(list) = self.pending.get_mut(sender) {
            let mut gap = None;
            for (n, hash) in list.iter() {
                let affordable = self
                    .all
                    .get(hash)
                    .is_some_and(|entry| entry.tx.cost() <= balance);
                if *n < nonce {
                    dropped.push(*hash);
                } else if !affordable {
                    dropped.push(*hash);
                    gap.get_or_insert(*n);
                }
            }
            list.retain(|_, hash| !dropped.contains(hash));

            let demote_from = match (gap, list.keys().next()) {
                (Some(gap), _) => Some(gap),
                (None, Some(first)) if *first != nonce => Some(*first),
                _ => None,
            };
            if let Some(from) = demote_from {
                let tail = list.split_off(&from);
                self.queue.entry(*sender).or_default().extend(tail);
            }
            if list.is_empty() {
                self.pending.remove(sender);
            }
        }

        if let Some(list) = self.queue.get_mut(sender) {
            let stale: Vec<Hash> = list
                .iter()
                .filter(|(n, hash)| {
                    **n < nonce
                        || self
                            .all
                            .get(*hash)
                            .map_or(true, |entry| entry.tx.cost() > balance)
                })
                .map(|(_, hash)| *hash)
                .collect();
            list.retain(|_, hash| !stale.contains(hash));
            if list.is_empty() {
                self.queue.remove(sender);
            }
            dropped.extend(stale);
        }

        for hash in dropped {
            self.forget(&hash);
        }
    }

    fn collect(&self, lists: &HashMap<Address, NonceList>) -> BTreeMap<Address, Vec<Transaction>> {
        lists
            .iter()
            .map(|(sender, list)| {
                let txs = list
                    .values()
                    .filter_map(|hash| self.all.get(hash))
                    .map(|entry| entry.tx.clone())
                    .collect();
                (*sender, txs)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::Account;

    const ALICE: Address = [0xa1; 20];
    const BOB: Address = [0xb0; 20];

    /// Unsigned transaction; the value tags the sender so hashes differ.
    fn tx_from(sender: Address, nonce: u64, price: u64) -> Transaction {
        Transaction {
            nonce,
            gas_price: U256::from(price),
            gas_limit: 21_000,
            to: Some([0xee; 20]),
            value: U256::from(sender[0]),
            ..Default::default()
        }
    }

    fn tx(nonce: u64, price: u64) -> Transaction {
        tx_from(ALICE, nonce, price)
    }

    fn state() -> WorldState {
        let mut state = WorldState::new();
        for address in [ALICE, BOB] {
            state.set_account(address, Account::new(0, U256::from(10_000_000u64)));
        }
        state
    }

    fn set() -> PendingSet {
        PendingSet::new(TxPoolConfig::for_testing())
    }

    #[test]
    fn test_gap_queues_then_promotes() {
        let mut set = set();
        let state = state();

        assert!(set.insert(tx(1, 1), ALICE, false, &state).unwrap().is_empty());
        assert_eq!(set.queued_len(), 1);

        let promoted = set.insert(tx(0, 1), ALICE, false, &state).unwrap();
        assert_eq!(promoted.len(), 2);
        assert_eq!(set.pending_len(), 2);
        assert_eq!(set.queued_len(), 0);
        assert_eq!(set.pending_nonce(&ALICE, &state), 2);
    }

    #[test]
    fn test_replacement_needs_bump() {
        let mut set = set();
        let state = state();
        set.insert(tx(0, 100), ALICE, false, &state).unwrap();

        let same_price = tx_from(BOB, 0, 100);
        assert_eq!(
            set.insert(same_price, ALICE, false, &state),
            Err(PoolError::Underpriced)
        );
        assert_eq!(
            set.insert(tx(0, 109), ALICE, false, &state),
            Err(PoolError::Underpriced)
        );

        let replacement = tx(0, 110);
        let announced = set.insert(replacement.clone(), ALICE, false, &state).unwrap();
        assert_eq!(announced, vec![replacement.clone()]);
        assert_eq!(set.len(), 1);
        assert!(set.contains(&replacement.hash()));
        assert!(!set.contains(&tx(0, 100).hash()));
    }

    #[test]
    fn test_removing_pending_demotes_later_nonces() {
        let mut set = set();
        let state = state();
        for nonce in 0..3 {
            set.insert(tx(nonce, 1), ALICE, false, &state).unwrap();
        }
        set.remove(&tx(1, 1).hash()).unwrap();

        assert_eq!(set.pending_len(), 1);
        assert_eq!(set.queued_len(), 1);
    }

    #[test]
    fn test_reset_drops_mined_and_unaffordable() {
        let mut set = set();
        let mut state = state();
        for nonce in 0..3 {
            set.insert(tx(nonce, 1), ALICE, false, &state).unwrap();
        }
        set.insert(tx_from(BOB, 0, 1), BOB, false, &state).unwrap();

        // Nonce 0 mined for Alice, Bob drained.
        state.set_account(ALICE, Account::new(1, U256::from(10_000_000u64)));
        state.set_account(BOB, Account::new(0, U256::from(5u64)));
        set.reset(&state);

        assert!(!set.contains(&tx(0, 1).hash()));
        assert!(!set.contains(&tx_from(BOB, 0, 1).hash()));
        assert_eq!(set.pending().get(&ALICE).map(Vec::len), Some(2));
        assert!(set.pending().get(&BOB).is_none());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_reset_after_nonce_rollback_requeues() {
        let mut set = set();
        let mut state = state();
        state.set_account(ALICE, Account::new(2, U256::from(10_000_000u64)));
        set.insert(tx(2, 1), ALICE, false, &state).unwrap();
        assert_eq!(set.pending_len(), 1);

        // A reorg rolls the account back to nonce 0.
        state.set_account(ALICE, Account::new(0, U256::from(10_000_000u64)));
        set.reset(&state);
        assert_eq!(set.pending_len(), 0);
        assert_eq!(set.queued_len(), 1);
    }

    #[test]
    fn test_account_limit_evicts_cheapest_queued() {
        let mut set = set();
        let state = state();
        // Capacity 6: four executable and two future transactions.
        for nonce in 0..4 {
            set.insert(tx(nonce, 5), ALICE, false, &state).unwrap();
        }
        set.insert(tx(10, 1), ALICE, false, &state).unwrap();
        set.insert(tx(11, 2), ALICE, false, &state).unwrap();

        assert_eq!(
            set.insert(tx(12, 1), ALICE, false, &state),
            Err(PoolError::AccountLimitReached { limit: 6 })
        );
        set.insert(tx(12, 3), ALICE, false, &state).unwrap();
        assert!(!set.contains(&tx(10, 1).hash()));
        assert_eq!(set.len(), 6);
    }

    #[test]
    fn test_locals_skip_price_index() {
        let mut set = set();
        let state = state();
        set.mark_local(ALICE);
        set.insert(tx(0, 1), ALICE, false, &state).unwrap();
        set.insert(tx_from(BOB, 0, 1), BOB, false, &state).unwrap();

        assert_eq!(set.local_len(), 1);
        assert_eq!(set.remote_len(), 1);
        assert_eq!(set.locals(), vec![ALICE]);
    }
}
