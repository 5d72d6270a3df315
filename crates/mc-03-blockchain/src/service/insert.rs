//! Full block import, fork choice and reorganization.

use super::{stamp_logs, tx_lookup_ops, BlockChain};
use crate::domain::schema::{
    body_key, canonical_key, encode, header_key, number_key, receipts_key, state_key, td_key,
    tx_lookup_key, HEAD_BLOCK_KEY, HEAD_FAST_KEY,
};
use crate::domain::{ChainError, InsertError, WorldState};
use crate::ports::{BatchOperation, BlockContext, TxContext};
use shared_bus::ChainEvent;
use shared_types::{receipts_root, Block, BlockHeader, Log, Receipt, U256};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of importing one block.
enum Imported {
    /// Already canonical.
    Known,
    /// Stored on a side branch.
    Side,
    /// Became the new head.
    Head,
}

impl BlockChain {
    /// Verify, execute and import a contiguous run of blocks.
    ///
    /// Blocks are committed one at a time in order. On failure the error
    /// carries the index of the failing block; every block before it stays
    /// imported. One `ChainHead` event is published at the end if the head
    /// moved, also when the batch fails part way.
    pub fn insert_chain(&self, blocks: &[Block]) -> Result<usize, InsertError> {
        check_contiguous(blocks)?;
        if blocks.is_empty() {
            return Ok(0);
        }

        let _guard = self.insert_lock.lock();
        let mut head_moved = false;
        let mut result = Ok(blocks.len());

        for (index, block) in blocks.iter().enumerate() {
            match self.insert_block(block) {
                Ok(Imported::Head) => head_moved = true,
                Ok(Imported::Side) | Ok(Imported::Known) => {}
                Err(e) => {
                    debug!(index, number = block.number(), error = %e, "Block import failed");
                    result = Err(InsertError::new(index, e));
                    break;
                }
            }
        }

        if head_moved {
            let head = self.current_block();
            info!(
                number = head.number(),
                hash = %hex::encode(head.hash()),
                txs = head.transactions.len(),
                "Imported new chain segment"
            );
            self.publish(ChainEvent::ChainHead(head.header.clone()));
        }
        result
    }

    fn insert_block(&self, block: &Block) -> Result<Imported, ChainError> {
        let hash = block.hash();

        if self.has_block(&hash) && self.has_state(&block.header.state_root) {
            if self.canonical_hash(block.number()) == Some(hash) {
                return Ok(Imported::Known);
            }
            // Known side block: only fork choice is left to do.
            let td = self.require_td(&block.header)?;
            return self.choose_fork(block, td, false);
        }

        let parent = self
            .read_header(block.number().saturating_sub(1), &block.parent_hash())?
            .filter(|_| block.number() > 0)
            .ok_or(ChainError::UnknownAncestor(block.parent_hash()))?;
        if !self.has_state(&parent.state_root) {
            return Err(ChainError::UnknownAncestor(block.parent_hash()));
        }
        let parent_td = self.require_td(&parent)?;

        self.engine.verify_header(&block.header, &parent)?;
        verify_body(block)?;

        let mut state = self.state_at(&parent.state_root)?;
        let mut receipts = self.execute(block, &mut state)?;
        self.engine
            .finalize(&block.header, &mut state, &block.uncles)?;

        let gas_used = receipts.last().map_or(0, |r| r.cumulative_gas_used);
        if gas_used != block.header.gas_used {
            return Err(ChainError::GasUsedMismatch {
                expected: block.header.gas_used,
                got: gas_used,
            });
        }
        let computed = receipts_root(&receipts);
        if computed != block.header.receipts_root {
            return Err(ChainError::ReceiptsRootMismatch {
                expected: block.header.receipts_root,
                got: computed,
            });
        }
        let commitment = state.commit();
        if commitment.root != block.header.state_root {
            return Err(ChainError::StateRootMismatch {
                expected: block.header.state_root,
                got: commitment.root,
            });
        }

        stamp_logs(block, &hash, &mut receipts);
        let td = parent_td.saturating_add(block.header.difficulty);
        let number = block.number();

        let mut ops = vec![
            BatchOperation::put(header_key(number, &hash), encode(&block.header)?),
            BatchOperation::put(body_key(number, &hash), encode(&block.body())?),
            BatchOperation::put(receipts_key(number, &hash), encode(&receipts)?),
            BatchOperation::put(td_key(number, &hash), encode(&td)?),
            BatchOperation::put(number_key(&hash), encode(&number)?),
        ];
        ops.extend(
            commitment
                .nodes
                .into_iter()
                .map(|(node, bytes)| BatchOperation::put(state_key(&node), bytes)),
        );
        self.db.atomic_batch_write(ops)?;

        self.choose_fork(block, td, true)
    }

    /// Execute every transaction of `block` on `state`.
    pub(crate) fn execute(
        &self,
        block: &Block,
        state: &mut WorldState,
    ) -> Result<Vec<Receipt>, ChainError> {
        let ctx = BlockContext {
            number: block.number(),
            coinbase: block.header.coinbase,
            timestamp: block.header.timestamp,
            gas_limit: block.header.gas_limit,
            difficulty: block.header.difficulty,
        };
        let mut receipts = Vec::with_capacity(block.transactions.len());
        let mut gas_used = 0u64;
        for (index, tx) in block.transactions.iter().enumerate() {
            let tx_ctx = TxContext {
                index: index as u32,
                hash: tx.hash(),
                gas_used_before: gas_used,
            };
            let receipt = self
                .executor
                .apply_transaction(&ctx, &tx_ctx, state, tx)
                .map_err(|source| ChainError::Execution { index, source })?;
            gas_used = receipt.cumulative_gas_used;
            receipts.push(receipt);
        }
        Ok(receipts)
    }

    fn choose_fork(&self, block: &Block, td: U256, fresh: bool) -> Result<Imported, ChainError> {
        let current = self.current_block();
        let current_td = self.require_td(&current.header)?;

        if self.reorg_needed(&current.header, current_td, &block.header, td) {
            self.reorg(&current, block)?;
            return Ok(Imported::Head);
        }

        if fresh {
            debug!(number = block.number(), hash = %hex::encode(block.hash()), "Stored side block");
            self.publish(ChainEvent::ChainSide(block.clone()));
        }
        Ok(Imported::Side)
    }

    /// Fork choice between the current head and an external block.
    ///
    /// Higher total difficulty wins. On equal difficulty the lower block
    /// wins, and on equal height a preserved external block replaces a head
    /// that is not preserved.
    pub(crate) fn reorg_needed(
        &self,
        current: &BlockHeader,
        current_td: U256,
        external: &BlockHeader,
        external_td: U256,
    ) -> bool {
        match external_td.cmp(&current_td) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => match external.number.cmp(&current.number) {
                Ordering::Less => true,
                Ordering::Greater => false,
                Ordering::Equal => {
                    self.should_preserve(external) && !self.should_preserve(current)
                }
            },
        }
    }

    /// Make `new_head` canonical in place of `old_head`.
    ///
    /// The detached and attached branches are rewritten in one batch. Events
    /// for detached blocks are published before events for attached ones.
    fn reorg(&self, old_head: &Block, new_head: &Block) -> Result<(), ChainError> {
        let mut detached: Vec<Block> = Vec::new();
        let mut attached: Vec<Block> = Vec::new();

        let mut old = old_head.clone();
        let mut new = new_head.clone();
        while old.number() > new.number() {
            let parent = self.require_block(&old.parent_hash())?;
            detached.push(std::mem::replace(&mut old, parent));
        }
        while new.number() > old.number() {
            let parent = self.require_block(&new.parent_hash())?;
            attached.push(std::mem::replace(&mut new, parent));
        }
        while old.hash() != new.hash() {
            let old_parent = self.require_block(&old.parent_hash())?;
            let new_parent = self.require_block(&new.parent_hash())?;
            detached.push(std::mem::replace(&mut old, old_parent));
            attached.push(std::mem::replace(&mut new, new_parent));
        }
        let ancestor = old;

        let new_number = new_head.number();
        let new_hash = new_head.hash();
        let top = old_head.number().max(self.current_fast_block().number());

        let mut ops = Vec::new();
        for number in (new_number + 1)..=top {
            ops.push(BatchOperation::delete(canonical_key(number)));
        }
        for block in &detached {
            for tx in &block.transactions {
                ops.push(BatchOperation::delete(tx_lookup_key(&tx.hash())));
            }
        }
        for block in attached.iter().rev() {
            let hash = block.hash();
            ops.push(BatchOperation::put(canonical_key(block.number()), encode(&hash)?));
            ops.extend(tx_lookup_ops(block, &hash)?);
        }
        ops.push(BatchOperation::put(HEAD_BLOCK_KEY, encode(&new_hash)?));
        ops.push(BatchOperation::put(HEAD_FAST_KEY, encode(&new_hash)?));
        self.db.atomic_batch_write(ops)?;

        let head = Arc::new(new_head.clone());
        self.head.store(Arc::clone(&head));
        self.fast_head.store(head);

        if !detached.is_empty() {
            info!(
                ancestor = ancestor.number(),
                dropped = detached.len(),
                added = attached.len(),
                "Chain reorg"
            );
        }

        let mut removed_logs = Vec::new();
        for block in &detached {
            removed_logs.extend(self.block_logs(block, true));
            self.publish(ChainEvent::ChainSide(block.clone()));
        }
        if !removed_logs.is_empty() {
            self.publish(ChainEvent::RemovedLogs(removed_logs));
        }

        let new_logs: Vec<Log> = attached
            .iter()
            .rev()
            .flat_map(|block| self.block_logs(block, false))
            .collect();
        if !new_logs.is_empty() {
            self.publish(ChainEvent::NewLogs(new_logs));
        }
        Ok(())
    }

    fn block_logs(&self, block: &Block, removed: bool) -> Vec<Log> {
        self.get_receipts(&block.hash())
            .unwrap_or_default()
            .into_iter()
            .flat_map(|receipt| receipt.logs)
            .map(|mut log| {
                log.removed = removed;
                log
            })
            .collect()
    }
}

/// Every block must extend the one before it.
pub(crate) fn check_contiguous(blocks: &[Block]) -> Result<(), InsertError> {
    for (index, pair) in blocks.windows(2).enumerate() {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.number() != prev.number() + 1 || next.parent_hash() != prev.hash() {
            return Err(InsertError::new(
                index + 1,
                ChainError::NonContiguousInsert {
                    prev: prev.number(),
                    number: next.number(),
                },
            ));
        }
    }
    Ok(())
}

/// Body commitments in the header must match the body.
pub(crate) fn verify_body(block: &Block) -> Result<(), ChainError> {
    let body = block.body();
    if body.transactions_root() != block.header.transactions_root {
        return Err(ChainError::BodyMismatch("transactions root"));
    }
    if body.uncles_hash() != block.header.uncles_hash {
        return Err(ChainError::BodyMismatch("uncles hash"));
    }
    Ok(())
}
