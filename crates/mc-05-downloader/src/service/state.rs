//! Pivot state download.

use super::Downloader;
use crate::domain::{StateScheduler, SyncError};
use crate::metrics;
use futures::future::join_all;
use mc_02_request_distributor::{DistributorError, FetchRequest, Request, RequestKind, Response};
use parking_lot::Mutex;
use shared_types::{Hash, PeerId};
use std::collections::HashSet;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

impl Downloader {
    /// Download the state trie under `root` with `state_workers` workers.
    ///
    /// The first worker failure stops the others.
    pub(super) async fn sync_state(
        &self,
        root: Hash,
        pivot: u64,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        info!(root = %hex::encode(root), pivot, workers = self.config.state_workers, "Downloading pivot state");
        let scheduler = Mutex::new(StateScheduler::new(root));
        let wake = Notify::new();
        let abort = cancel.child_token();

        let workers = (0..self.config.state_workers.max(1)).map(|worker| {
            let (scheduler, wake, abort) = (&scheduler, &wake, &abort);
            async move {
                let result = self.state_worker(worker, scheduler, wake, pivot, abort).await;
                if result.is_err() {
                    abort.cancel();
                    wake.notify_waiters();
                }
                result
            }
        });
        let errors: Vec<SyncError> = join_all(workers)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if let Some(error) = errors
            .iter()
            .find(|e| **e != SyncError::Cancelled)
            .or(errors.first())
        {
            return Err(error.clone());
        }
        let scheduler = scheduler.lock();
        info!(pulled = scheduler.pulled(), pivot, "Pivot state complete");
        Ok(())
    }

    async fn state_worker(
        &self,
        worker: usize,
        scheduler: &Mutex<StateScheduler>,
        wake: &Notify,
        pivot: u64,
        abort: &CancellationToken,
    ) -> Result<(), SyncError> {
        let mut exclude: HashSet<PeerId> = HashSet::new();
        let mut failures = 0u32;

        loop {
            if abort.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let (batch, idle) = {
                let mut scheduler = scheduler.lock();
                let batch = self.next_state_batch(&mut scheduler);
                if batch.is_empty() && scheduler.is_complete() {
                    debug!(worker, "State worker done");
                    return Ok(());
                }
                let idle = batch.is_empty().then(|| wake.notified());
                (batch, idle)
            };
            if let Some(notified) = idle {
                metrics::record_throttle();
                tokio::select! {
                    _ = abort.cancelled() => return Err(SyncError::Cancelled),
                    _ = notified => continue,
                }
            }

            let request =
                FetchRequest::new(Request::NodeData(batch.clone())).excluding(exclude.iter().copied());
            let delivery = match self.request(request, abort).await {
                Ok(delivery) => delivery,
                Err(e) => {
                    scheduler.lock().release(&batch);
                    wake.notify_waiters();
                    match e {
                        SyncError::Fetch(DistributorError::Timeout | DistributorError::PeerDropped) => {
                            failures += 1;
                            if failures > self.config.max_retrievals {
                                return Err(retrieval_failed(pivot, failures));
                            }
                            continue;
                        }
                        SyncError::Fetch(DistributorError::NoPeers) => {
                            return Err(retrieval_failed(pivot, failures + 1))
                        }
                        other => return Err(other),
                    }
                }
            };

            let nodes = match delivery.response {
                Response::NodeData(nodes) => nodes,
                _ => Vec::new(),
            };
            let outcome = {
                let mut scheduler = scheduler.lock();
                let outcome = scheduler.deliver(&batch, nodes);
                let mut progress = self.progress.write();
                progress.pulled_states = scheduler.pulled();
                progress.known_states = scheduler.known();
                outcome
            };
            if !outcome.accepted.is_empty() {
                self.chain.store_state_nodes(&outcome.accepted)?;
            }
            wake.notify_waiters();

            metrics::record_in("states", outcome.accepted.len());
            if outcome.dropped > 0 {
                metrics::record_dropped("states", outcome.dropped);
            }
            if outcome.accepted.is_empty() {
                debug!(worker, peer = %delivery.peer, missing = outcome.missing, "Useless node data, excluding peer");
                exclude.insert(delivery.peer);
                failures += 1;
                if failures > self.config.max_retrievals {
                    return Err(retrieval_failed(pivot, failures));
                }
            } else {
                failures = 0;
            }
        }
    }

    /// Next batch of hashes not already stored locally. Stored nodes are
    /// walked in place.
    fn next_state_batch(&self, scheduler: &mut StateScheduler) -> Vec<Hash> {
        loop {
            let batch = scheduler.next_batch(self.config.max_state_fetch);
            if batch.is_empty() {
                return batch;
            }
            let mut missing = Vec::with_capacity(batch.len());
            for hash in batch {
                match self.chain.get_state_node(&hash) {
                    Some(bytes) => scheduler.mark_present(hash, &bytes),
                    None => missing.push(hash),
                }
            }
            if !missing.is_empty() {
                return missing;
            }
        }
    }
}

fn retrieval_failed(pivot: u64, attempts: u32) -> SyncError {
    SyncError::RetrievalFailed {
        kind: RequestKind::NodeData,
        from: pivot,
        attempts,
    }
}
