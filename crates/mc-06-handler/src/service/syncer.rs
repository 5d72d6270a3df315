//! # Chain Syncer
//!
//! Decides when to sync and against whom. Wakes when a peer joins or
//! announces something unknown, and on a fixed interval. A wake-up without
//! enough peers does nothing; the interval forces a sync with whatever peers
//! are connected.

use super::Handler;
use mc_05_downloader::{SyncError, SyncMode, SyncReport};
use shared_types::{Hash, PeerId, U256};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A sync the syncer decided to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOp {
    pub peer: PeerId,
    pub head: Hash,
    pub td: U256,
    pub mode: SyncMode,
}

impl Handler {
    /// The sync to run now, if any.
    ///
    /// Targets the best peer when its TD is above ours. In fast mode ours is
    /// the TD of the fast-sync head, which may be ahead of the full head.
    pub fn next_sync_op(&self, forced: bool) -> Option<SyncOp> {
        if self.downloader.is_syncing() || self.peers.is_empty() {
            return None;
        }
        if !forced && self.peers.len() < self.config.min_sync_peers {
            return None;
        }
        let peer = self.peers.best_peer()?;
        let mode = if self.downloader.fast_sync_gate().is_enabled() {
            SyncMode::Fast
        } else {
            SyncMode::Full
        };
        let local_td = match mode {
            SyncMode::Fast => {
                let fast = self.chain.current_fast_block();
                self.chain
                    .get_td(&fast.hash())
                    .unwrap_or_else(|| self.chain.current_td())
            }
            SyncMode::Full => self.chain.current_td(),
        };
        let (head, td) = peer.head();
        if td <= local_td {
            return None;
        }
        Some(SyncOp {
            peer: peer.id(),
            head,
            td,
            mode,
        })
    }

    /// Run one sync and apply its outcome.
    pub async fn do_sync(&self, op: SyncOp) -> Result<SyncReport, SyncError> {
        debug!(peer = %op.peer, td = %op.td, mode = ?op.mode, "Starting sync");
        let result = self
            .downloader
            .synchronise(op.peer, op.head, op.td, op.mode)
            .await;
        match &result {
            Ok(report) => {
                let head = self.chain.current_block();
                if head.number() > 0 {
                    if self.downloader.fast_sync_gate().disable() {
                        info!(head = head.number(), "Fast sync complete, switching to full sync");
                    }
                } else if op.mode == SyncMode::Fast {
                    warn!("Fast sync finished on an empty chain, keeping fast sync enabled");
                }
                self.enable_transactions();
                if head.number() > 0 {
                    self.broadcast_block(&head, false);
                }
                debug!(imported = report.imported, head = head.number(), "Sync finished");
            }
            Err(e) => debug!(peer = %op.peer, error = %e, "Sync failed"),
        }
        result
    }

    /// Chain syncer loop. Runs until `cancel` fires, then stops any attempt
    /// in flight.
    pub async fn run_syncer(self: Arc<Self>, cancel: CancellationToken) {
        info!("Chain syncer started");
        let mut force = tokio::time::interval(self.config.force_sync_interval());
        force.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        force.tick().await;

        loop {
            let forced = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.sync_wakeup.notified() => false,
                _ = force.tick() => true,
            };
            let Some(op) = self.next_sync_op(forced) else {
                continue;
            };
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.downloader.cancel();
                    break;
                }
                _ = self.do_sync(op) => {}
            }
        }
        info!("Chain syncer stopped");
    }
}
