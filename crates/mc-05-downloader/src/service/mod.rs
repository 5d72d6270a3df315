//! # Downloader Service
//!
//! Runs one sync attempt at a time against a target peer.
//!
//! ```text
//! synchronise ─→ fetch head ─→ find ancestor ─→ ┌─ header batch (target peer) ─┐
//!                                               │  bodies / receipts (any peer) │
//!                                               │  commit ready prefix          │
//!                                               └──────── until remote head ───┘
//! ```
//!
//! The attempt owns a `CancellationToken`; `cancel()` fires it and every
//! distributor wait returns.

mod fetch;
mod state;

#[cfg(test)]
mod tests;

use crate::config::DownloaderConfig;
use crate::domain::{
    DownloadQueue, FastSyncGate, FetchResult, SyncError, SyncMode, SyncProgress, SyncReport,
    SyncState,
};
use crate::metrics;
use mc_01_peer_set::PeerSet;
use mc_02_request_distributor::{
    Delivery, DistributorError, FetchRequest, RequestDistributor, RequestKind,
};
use mc_03_blockchain::BlockChain;
use parking_lot::{Mutex, RwLock};
use shared_bus::{ChainEvent, EventPublisher};
use shared_types::{Block, Hash, PeerId, U256};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Chain synchroniser.
pub struct Downloader {
    config: DownloaderConfig,
    chain: Arc<BlockChain>,
    peers: Arc<PeerSet>,
    distributor: Arc<RequestDistributor>,
    events: Arc<dyn EventPublisher>,
    gate: FastSyncGate,
    busy: AtomicBool,
    cancel: Mutex<Option<CancellationToken>>,
    state: RwLock<SyncState>,
    progress: RwLock<SyncProgress>,
}

/// Clears the running flag however the attempt ends, dropped futures included.
struct AttemptGuard<'a>(&'a Downloader);

impl Drop for AttemptGuard<'_> {
    fn drop(&mut self) {
        *self.0.cancel.lock() = None;
        {
            let mut state = self.0.state.write();
            if !matches!(*state, SyncState::Idle | SyncState::Failed) {
                *state = SyncState::Idle;
            }
        }
        self.0.busy.store(false, Ordering::Release);
    }
}

impl Downloader {
    pub fn new(
        config: DownloaderConfig,
        chain: Arc<BlockChain>,
        peers: Arc<PeerSet>,
        distributor: Arc<RequestDistributor>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        let gate = FastSyncGate::for_head(chain.current_header().number);
        Self {
            config,
            chain,
            peers,
            distributor,
            events,
            gate,
            busy: AtomicBool::new(false),
            cancel: Mutex::new(None),
            state: RwLock::new(SyncState::Idle),
            progress: RwLock::new(SyncProgress::default()),
        }
    }

    // =========================================================================
    // PUBLIC API
    // =========================================================================

    /// Sync with `peer_id`, whose head is `head_hash` at total difficulty
    /// `head_td`.
    ///
    /// Publishes `SyncStarted` once the common ancestor is known, then
    /// `SyncCompleted` or `SyncFailed`.
    pub async fn synchronise(
        &self,
        peer_id: PeerId,
        head_hash: Hash,
        head_td: U256,
        mode: SyncMode,
    ) -> Result<SyncReport, SyncError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SyncError::Busy);
        }
        let cancel = CancellationToken::new();
        *self.cancel.lock() = Some(cancel.clone());
        let _guard = AttemptGuard(self);

        info!(
            peer = %peer_id,
            head = %hex::encode(head_hash),
            td = %head_td,
            %mode,
            "Starting sync attempt"
        );
        let result = self.run_attempt(peer_id, head_hash, mode, &cancel).await;

        match &result {
            Ok(report) => {
                self.set_state(SyncState::Idle);
                info!(
                    mode = %report.mode,
                    origin = report.origin,
                    head = report.head,
                    imported = report.imported,
                    pivot = ?report.pivot,
                    "Sync completed"
                );
                self.events.publish(ChainEvent::SyncCompleted {
                    head: report.head,
                    head_hash: report.head_hash,
                });
            }
            Err(SyncError::Cancelled) => {
                self.set_state(SyncState::Idle);
                info!(peer = %peer_id, "Sync cancelled");
                self.events.publish(ChainEvent::SyncFailed {
                    reason: SyncError::Cancelled.to_string(),
                });
            }
            Err(e) => {
                self.set_state(SyncState::Failed);
                warn!(peer = %peer_id, error = %e, "Sync failed");
                self.events.publish(ChainEvent::SyncFailed {
                    reason: e.to_string(),
                });
            }
        }
        result
    }

    /// Abort the running attempt, if any.
    pub fn cancel(&self) {
        if let Some(token) = self.cancel.lock().as_ref() {
            token.cancel();
        }
    }

    pub fn is_syncing(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn progress(&self) -> SyncProgress {
        *self.progress.read()
    }

    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    pub fn fast_sync_gate(&self) -> &FastSyncGate {
        &self.gate
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    // =========================================================================
    // ATTEMPT
    // =========================================================================

    async fn run_attempt(
        &self,
        peer_id: PeerId,
        head_hash: Hash,
        mode: SyncMode,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let peer = self
            .peers
            .peer(&peer_id)
            .ok_or(SyncError::UnknownPeer(peer_id))?;
        self.set_state(SyncState::FetchingHeaders);

        let remote = self.fetch_head(&peer, head_hash, cancel).await?;
        let mut origin = self.find_ancestor(&peer, &remote, mode, cancel).await?;
        let height = remote.number;

        let pivot = match mode {
            SyncMode::Fast => height
                .checked_sub(self.config.fs_min_full_blocks)
                .filter(|pivot| *pivot > origin.number),
            SyncMode::Full => None,
        };
        let mode = match (mode, pivot) {
            (SyncMode::Fast, None) => {
                debug!(origin = origin.number, height, "Pivot not above ancestor, syncing in full");
                // Fast-synced blocks above the full head have no state to execute on.
                let head = self.chain.current_header();
                if origin.number > head.number {
                    origin = head;
                }
                SyncMode::Full
            }
            (mode, _) => mode,
        };

        *self.progress.write() = SyncProgress {
            starting_block: self.chain.current_header().number,
            current_block: origin.number,
            highest_block: height,
            ..SyncProgress::default()
        };
        self.events.publish(ChainEvent::SyncStarted {
            origin: origin.number,
            target: height,
        });
        info!(
            peer = %peer_id,
            origin = origin.number,
            height,
            %mode,
            pivot = ?pivot,
            "Common ancestor found"
        );

        let mut queue = DownloadQueue::new(origin.number + 1);
        let mut parent = origin.clone();
        let mut imported = 0u64;
        while parent.number < height {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            self.set_state(SyncState::FetchingHeaders);
            let amount = (height - parent.number).min(self.config.max_header_fetch);
            let headers = self.fetch_headers(&peer, &parent, amount, cancel).await?;
            let Some(last) = headers.last().cloned() else {
                break;
            };
            parent = last;
            queue.schedule(headers, pivot);

            self.set_state(SyncState::FetchingBodiesAndReceipts);
            self.fetch_bodies(&mut queue, cancel).await?;
            if pivot.is_some() {
                self.fetch_receipts(&mut queue, cancel).await?;
            }

            self.set_state(SyncState::Committing);
            let ready = queue.take_ready();
            imported += self.commit(ready, pivot, cancel).await? as u64;
        }

        let head = self.chain.current_block();
        Ok(SyncReport {
            mode,
            origin: origin.number,
            head: head.number(),
            head_hash: head.hash(),
            imported,
            pivot,
        })
    }

    /// Commit a contiguous run of complete results.
    ///
    /// Blocks up to the pivot are stored with their receipts; once the pivot
    /// is stored its state is downloaded and it becomes the head. Blocks above
    /// the pivot are executed.
    async fn commit(
        &self,
        ready: Vec<FetchResult>,
        pivot: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<usize, SyncError> {
        let Some(last_number) = ready.last().map(FetchResult::number) else {
            return Ok(0);
        };
        let split = pivot.map_or(0, |pivot| ready.partition_point(|r| r.number() <= pivot));
        let (stored, executed) = ready.split_at(split);
        let mut committed = 0;

        if !stored.is_empty() {
            let blocks: Vec<Block> = stored.iter().filter_map(FetchResult::block).collect();
            let receipts = stored
                .iter()
                .map(|r| r.receipts.clone().unwrap_or_default())
                .collect();
            committed += self.chain.insert_receipt_chain(&blocks, receipts)?;

            if let (Some(pivot), Some(last)) = (pivot, blocks.last()) {
                if last.number() == pivot {
                    let root = last.header.state_root;
                    if !self.chain.has_state(&root) {
                        self.set_state(SyncState::FetchingState);
                        self.sync_state(root, pivot, cancel).await?;
                        self.set_state(SyncState::Committing);
                    }
                    self.chain.commit_fast_sync_head(&last.hash())?;
                }
            }
        }

        if !executed.is_empty() {
            let blocks: Vec<Block> = executed.iter().filter_map(FetchResult::block).collect();
            committed += self.chain.insert_chain(&blocks)?;
        }

        self.progress.write().current_block = last_number;
        debug!(count = committed, number = last_number, "Committed downloaded blocks");
        Ok(committed)
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    /// Send one request through the distributor, counting it.
    async fn request(
        &self,
        request: FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<Delivery, SyncError> {
        let kind = request.request.kind();
        metrics::record_request(label(kind));
        match self.distributor.fetch(request, cancel).await {
            Ok(delivery) => Ok(delivery),
            Err(e) => {
                if matches!(e, DistributorError::Timeout | DistributorError::PeerDropped) {
                    metrics::record_timeout(label(kind));
                }
                Err(e.into())
            }
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }
}

/// Metric label for a request kind.
pub(crate) fn label(kind: RequestKind) -> &'static str {
    match kind {
        RequestKind::Headers => "headers",
        RequestKind::Bodies => "bodies",
        RequestKind::Receipts => "receipts",
        RequestKind::NodeData => "states",
    }
}
