//! Fast-sync import and head rewinding.

use super::insert::{check_contiguous, verify_body};
use super::{stamp_logs, tx_lookup_ops, BlockChain};
use crate::domain::schema::{
    body_key, canonical_key, encode, header_key, number_key, receipts_key, td_key,
    tx_lookup_key, HEAD_BLOCK_KEY, HEAD_FAST_KEY,
};
use crate::domain::{ChainError, InsertError};
use crate::ports::BatchOperation;
use shared_bus::ChainEvent;
use shared_types::{receipts_root, Block, Hash, Receipt};
use std::sync::Arc;
use tracing::{info, warn};

impl BlockChain {
    /// Store blocks with their receipts without executing them.
    ///
    /// Blocks become canonical and advance the fast head; the full head is
    /// untouched until `commit_fast_sync_head`. Each block is one atomic batch.
    pub fn insert_receipt_chain(
        &self,
        blocks: &[Block],
        receipts: Vec<Vec<Receipt>>,
    ) -> Result<usize, InsertError> {
        if blocks.len() != receipts.len() {
            return Err(InsertError::new(
                0,
                ChainError::ReceiptCountMismatch {
                    blocks: blocks.len(),
                    receipts: receipts.len(),
                },
            ));
        }
        check_contiguous(blocks)?;

        let _guard = self.insert_lock.lock();
        for (index, (block, receipts)) in blocks.iter().zip(receipts).enumerate() {
            self.insert_receipt_block(block, receipts)
                .map_err(|e| InsertError::new(index, e))?;
        }

        if let Some(last) = blocks.last() {
            info!(
                count = blocks.len(),
                number = last.number(),
                "Imported fast-sync blocks with receipts"
            );
        }
        Ok(blocks.len())
    }

    fn insert_receipt_block(
        &self,
        block: &Block,
        mut receipts: Vec<Receipt>,
    ) -> Result<(), ChainError> {
        let hash = block.hash();
        let number = block.number();
        if self.has_block(&hash) && self.canonical_hash(number) == Some(hash) {
            return Ok(());
        }

        let parent = self
            .read_header(number.saturating_sub(1), &block.parent_hash())?
            .filter(|_| number > 0)
            .ok_or(ChainError::UnknownAncestor(block.parent_hash()))?;
        let parent_td = self.require_td(&parent)?;

        verify_body(block)?;
        let computed = receipts_root(&receipts);
        if computed != block.header.receipts_root {
            return Err(ChainError::ReceiptsRootMismatch {
                expected: block.header.receipts_root,
                got: computed,
            });
        }

        stamp_logs(block, &hash, &mut receipts);
        let td = parent_td.saturating_add(block.header.difficulty);

        let mut ops = vec![
            BatchOperation::put(header_key(number, &hash), encode(&block.header)?),
            BatchOperation::put(body_key(number, &hash), encode(&block.body())?),
            BatchOperation::put(receipts_key(number, &hash), encode(&receipts)?),
            BatchOperation::put(td_key(number, &hash), encode(&td)?),
            BatchOperation::put(number_key(&hash), encode(&number)?),
            BatchOperation::put(canonical_key(number), encode(&hash)?),
        ];
        ops.extend(tx_lookup_ops(block, &hash)?);

        let advances = number > self.current_fast_block().number();
        if advances {
            ops.push(BatchOperation::put(HEAD_FAST_KEY, encode(&hash)?));
        }
        self.db.atomic_batch_write(ops)?;
        if advances {
            self.fast_head.store(Arc::new(block.clone()));
        }
        Ok(())
    }

    /// Make a fast-synced block with fully stored state the head.
    pub fn commit_fast_sync_head(&self, hash: &Hash) -> Result<(), ChainError> {
        let _guard = self.insert_lock.lock();

        let block = self.require_block(hash)?;
        if !self.has_state(&block.header.state_root) {
            return Err(ChainError::MissingState(block.header.state_root));
        }

        let ops = vec![
            BatchOperation::put(canonical_key(block.number()), encode(hash)?),
            BatchOperation::put(HEAD_BLOCK_KEY, encode(hash)?),
            BatchOperation::put(HEAD_FAST_KEY, encode(hash)?),
        ];
        self.db.atomic_batch_write(ops)?;

        let head = Arc::new(block);
        self.head.store(Arc::clone(&head));
        self.fast_head.store(Arc::clone(&head));

        info!(
            number = head.number(),
            hash = %hex::encode(hash),
            "Committed fast-sync pivot as head"
        );
        self.publish(ChainEvent::ChainHead(head.header.clone()));
        Ok(())
    }

    /// Rewind the canonical chain to `number`.
    ///
    /// The head moves to the nearest block at or below `number` whose state is
    /// stored. Blocks above stay in the store as side data. A target above the
    /// fast head is clamped to it.
    pub fn set_head(&self, number: u64) -> Result<(), ChainError> {
        let _guard = self.insert_lock.lock();

        let head = self.current_block();
        let fast = self.current_fast_block();
        let top = head.number().max(fast.number());

        let fast_target = self.canonical_block(number.min(fast.number()))?;
        let mut head_target = self.canonical_block(number.min(head.number()))?;
        while head_target.number() > 0 && !self.has_state(&head_target.header.state_root) {
            head_target = self.require_block(&head_target.parent_hash())?;
        }
        if !self.has_state(&head_target.header.state_root) {
            warn!("Genesis state missing");
        }

        let mut ops = Vec::new();
        for n in (fast_target.number() + 1)..=top {
            let Some(hash) = self.canonical_hash(n) else {
                continue;
            };
            if let Some(body) = self.get_body(&hash) {
                for tx in &body.transactions {
                    ops.push(BatchOperation::delete(tx_lookup_key(&tx.hash())));
                }
            }
            ops.push(BatchOperation::delete(canonical_key(n)));
        }
        ops.push(BatchOperation::put(HEAD_BLOCK_KEY, encode(&head_target.hash())?));
        ops.push(BatchOperation::put(HEAD_FAST_KEY, encode(&fast_target.hash())?));
        self.db.atomic_batch_write(ops)?;

        let head_target = Arc::new(head_target);
        self.head.store(Arc::clone(&head_target));
        self.fast_head.store(Arc::new(fast_target));

        info!(
            number = head_target.number(),
            fast = self.current_fast_block().number(),
            "Rewound chain head"
        );
        self.publish(ChainEvent::ChainHead(head_target.header.clone()));
        Ok(())
    }

    fn canonical_block(&self, number: u64) -> Result<Block, ChainError> {
        let hash = self
            .read::<Hash>(&canonical_key(number))?
            .ok_or(ChainError::MissingCanonical(number))?;
        self.require_block(&hash)
    }
}
