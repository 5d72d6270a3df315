//! # Download Queue
//!
//! Per-attempt buffer of fetch results keyed by block number. Headers are
//! scheduled in order, bodies and receipts arrive in any order, and only the
//! contiguous complete prefix is handed out for commit.

use shared_types::{
    receipts_root, transactions_root, uncles_hash, Block, BlockBody, BlockHeader, Receipt,
};
use std::collections::BTreeMap;

/// Everything needed to commit one block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub header: BlockHeader,
    pub body: Option<BlockBody>,
    pub receipts: Option<Vec<Receipt>>,
    pub needs_receipts: bool,
}

impl FetchResult {
    fn new(header: BlockHeader, needs_receipts: bool) -> Self {
        let empty_body = header.transactions_root == transactions_root(&[])
            && header.uncles_hash == uncles_hash(&[]);
        let empty_receipts = header.receipts_root == receipts_root(&[]);
        Self {
            body: empty_body.then(BlockBody::default),
            receipts: (needs_receipts && empty_receipts).then(Vec::new),
            header,
            needs_receipts,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.body.is_some() && (!self.needs_receipts || self.receipts.is_some())
    }

    pub fn number(&self) -> u64 {
        self.header.number
    }

    /// Assemble the block. `None` until the body arrived.
    pub fn block(&self) -> Option<Block> {
        let body = self.body.clone()?;
        Some(Block::new(self.header.clone(), body))
    }
}

/// Results of one attempt, committed in strictly increasing order.
#[derive(Debug, Default)]
pub struct DownloadQueue {
    results: BTreeMap<u64, FetchResult>,
    next: u64,
}

impl DownloadQueue {
    /// Queue whose first committable block is `next`.
    pub fn new(next: u64) -> Self {
        Self {
            results: BTreeMap::new(),
            next,
        }
    }

    /// Schedule verified headers. Receipts are fetched for blocks at or below
    /// `receipts_up_to`. Empty bodies and receipt lists are filled directly.
    pub fn schedule(&mut self, headers: Vec<BlockHeader>, receipts_up_to: Option<u64>) {
        for header in headers {
            let needs_receipts = receipts_up_to.is_some_and(|pivot| header.number <= pivot);
            self.results
                .insert(header.number, FetchResult::new(header, needs_receipts));
        }
    }

    /// Headers still waiting for a body, lowest first.
    pub fn missing_bodies(&self) -> Vec<BlockHeader> {
        self.results
            .values()
            .filter(|r| r.body.is_none())
            .map(|r| r.header.clone())
            .collect()
    }

    /// Headers still waiting for receipts, lowest first.
    pub fn missing_receipts(&self) -> Vec<BlockHeader> {
        self.results
            .values()
            .filter(|r| r.needs_receipts && r.receipts.is_none())
            .map(|r| r.header.clone())
            .collect()
    }

    /// Store a verified body. Returns false for unscheduled numbers.
    pub fn deliver_body(&mut self, number: u64, body: BlockBody) -> bool {
        match self.results.get_mut(&number) {
            Some(result) => {
                result.body = Some(body);
                true
            }
            None => false,
        }
    }

    /// Store verified receipts. Returns false for unscheduled numbers.
    pub fn deliver_receipts(&mut self, number: u64, receipts: Vec<Receipt>) -> bool {
        match self.results.get_mut(&number) {
            Some(result) if result.needs_receipts => {
                result.receipts = Some(receipts);
                true
            }
            _ => false,
        }
    }

    /// Remove and return the contiguous complete prefix.
    pub fn take_ready(&mut self) -> Vec<FetchResult> {
        let mut ready = Vec::new();
        while self
            .results
            .get(&self.next)
            .is_some_and(FetchResult::is_complete)
        {
            if let Some(result) = self.results.remove(&self.next) {
                ready.push(result);
            }
            self.next += 1;
        }
        ready
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}
