//! Request distributor service.
//!
//! # Lifecycle of a fetch
//!
//! ```text
//! fetch ──► queue (FIFO) ──assign()──► in flight ──deliver()──► Delivery
//!              ▲                          │
//!              └──── front, peer excluded ┘ timeout / peer dropped
//! ```
//!
//! `assign()` runs on enqueue, on every delivery or expiry, on
//! `peers_changed()` and on a periodic tick while anything is queued. It visits
//! free peers by descending TD (lowest id first on ties) and lets each take the
//! oldest queued request it can serve.

use crate::config::DistributorConfig;
use crate::domain::{
    Delivery, DeliveryError, DistributorError, FetchRequest, RequestKind, Response,
};
use mc_01_peer_set::{Peer, PeerSet};
use parking_lot::Mutex;
use shared_types::protocol::DisconnectReason;
use shared_types::PeerId;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// What happened to an in-flight request.
enum Outcome {
    Delivered(Response),
    PeerLost,
}

/// A request handed to a peer.
struct Assignment {
    peer: PeerId,
    request_id: u64,
    outcome: oneshot::Receiver<Outcome>,
}

struct Queued {
    seq: u64,
    request: FetchRequest,
    assign: oneshot::Sender<Assignment>,
}

struct InFlight {
    peer: PeerId,
    kind: RequestKind,
    outcome: oneshot::Sender<Outcome>,
}

#[derive(Default)]
struct State {
    queue: VecDeque<Queued>,
    /// Peers with a request in flight.
    busy: HashSet<PeerId>,
    pending: HashMap<u64, InFlight>,
    /// Consecutive timeouts per peer.
    timeouts: HashMap<PeerId, u32>,
    closed: bool,
}

/// Point-in-time view of the distributor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DistributorStats {
    pub queued: usize,
    pub in_flight: usize,
    pub busy_peers: usize,
}

/// Assigns data requests to capable peers.
pub struct RequestDistributor {
    peers: Arc<PeerSet>,
    config: DistributorConfig,
    state: Mutex<State>,
    next_request_id: AtomicU64,
    next_seq: AtomicU64,
}

impl RequestDistributor {
    pub fn new(peers: Arc<PeerSet>, config: DistributorConfig) -> Self {
        Self {
            peers,
            config,
            state: Mutex::new(State::default()),
            next_request_id: AtomicU64::new(1),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &DistributorConfig {
        &self.config
    }

    /// Fetch data from the network.
    ///
    /// Waits for a capable peer, sends the request under a fresh correlation
    /// id and waits for the matching delivery. Timeouts and dropped peers
    /// requeue the request at the front with the failing peer excluded, unless
    /// the request is pinned.
    pub async fn fetch(
        &self,
        request: FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<Delivery, DistributorError> {
        let mut request = request;
        let mut attempts = 0u32;
        let mut retry = false;
        loop {
            let mut assignment = self.wait_for_assignment(&request, retry, cancel).await?;
            attempts += 1;
            let peer = assignment.peer;
            let request_id = assignment.request_id;

            let waited = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                res = tokio::time::timeout(self.config.request_timeout(), &mut assignment.outcome) => Some(res),
            };

            let outcome = match waited {
                None => {
                    self.release(peer, request_id);
                    return Err(DistributorError::Cancelled);
                }
                Some(Ok(Ok(outcome))) => outcome,
                // Sender dropped: the distributor was closed.
                Some(Ok(Err(_))) => return Err(DistributorError::Closed),
                Some(Err(_elapsed)) => {
                    if self.expire(peer, request_id) {
                        warn!(peer = %peer, request_id, kind = %request.request.kind(), "Request timed out");
                        if request.is_pinned() || attempts >= self.config.max_attempts {
                            return Err(DistributorError::Timeout);
                        }
                        request.exclude.insert(peer);
                        retry = true;
                        continue;
                    }
                    // Delivered while the timer fired.
                    match assignment.outcome.try_recv() {
                        Ok(outcome) => outcome,
                        Err(_) => Outcome::PeerLost,
                    }
                }
            };

            match outcome {
                Outcome::Delivered(response) => {
                    return Ok(Delivery {
                        peer,
                        request_id,
                        response,
                    })
                }
                Outcome::PeerLost => {
                    debug!(peer = %peer, request_id, "Peer lost with request in flight");
                    if request.is_pinned() {
                        return Err(DistributorError::PeerDropped);
                    }
                    request.exclude.insert(peer);
                    retry = true;
                }
            }
        }
    }

    /// Queue the request and wait until `assign()` hands it to a peer.
    async fn wait_for_assignment(
        &self,
        request: &FetchRequest,
        front: bool,
        cancel: &CancellationToken,
    ) -> Result<Assignment, DistributorError> {
        let (tx, mut rx) = oneshot::channel();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(DistributorError::Closed);
            }
            let queued = Queued {
                seq,
                request: request.clone(),
                assign: tx,
            };
            if front {
                state.queue.push_front(queued);
            } else {
                state.queue.push_back(queued);
            }
        }
        self.assign();

        let mut ticker = tokio::time::interval(self.config.assign_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut idle_since: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.dequeue(seq, &mut rx);
                    return Err(DistributorError::Cancelled);
                }
                assigned = &mut rx => {
                    return assigned.map_err(|_| DistributorError::Closed);
                }
                _ = ticker.tick() => {
                    if self.peers.is_closed() {
                        self.dequeue(seq, &mut rx);
                        return Err(DistributorError::Closed);
                    }
                    if let Some(target) = request.target {
                        if self.peers.peer(&target).is_none() {
                            self.dequeue(seq, &mut rx);
                            return Err(DistributorError::PeerDropped);
                        }
                    }
                    if self.has_capable_peer(request) {
                        idle_since = None;
                        self.assign();
                    } else {
                        let since = *idle_since.get_or_insert_with(Instant::now);
                        if since.elapsed() >= self.config.no_peer_timeout() {
                            self.dequeue(seq, &mut rx);
                            return Err(DistributorError::NoPeers);
                        }
                    }
                }
            }
        }
    }

    fn has_capable_peer(&self, request: &FetchRequest) -> bool {
        self.peers
            .peers()
            .iter()
            .any(|p| request.can_serve(p, self.peers.has_extension(&p.id())))
    }

    /// Remove a queued request. If it was assigned concurrently, release the
    /// assignment instead.
    fn dequeue(&self, seq: u64, rx: &mut oneshot::Receiver<Assignment>) {
        let removed = {
            let mut state = self.state.lock();
            let before = state.queue.len();
            state.queue.retain(|q| q.seq != seq);
            state.queue.len() != before
        };
        if !removed {
            if let Ok(assignment) = rx.try_recv() {
                self.release(assignment.peer, assignment.request_id);
            }
        }
    }

    /// Hand queued requests to free peers.
    pub fn assign(&self) {
        let mut candidates: Vec<(Arc<Peer>, bool)> = self
            .peers
            .peers()
            .into_iter()
            .map(|p| {
                let snap = self.peers.has_extension(&p.id());
                (p, snap)
            })
            .collect();
        candidates.sort_by_key(|(p, _)| (Reverse(p.td()), p.id()));

        let mut dispatches = Vec::new();
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            for (peer, snap) in candidates {
                if state.queue.is_empty() {
                    break;
                }
                if state.busy.contains(&peer.id()) {
                    continue;
                }
                // Requests whose fetcher went away are dropped on the way.
                state.queue.retain(|q| !q.assign.is_closed());
                let Some(pos) = state
                    .queue
                    .iter()
                    .position(|q| q.request.can_serve(&peer, snap))
                else {
                    continue;
                };
                let Some(queued) = state.queue.remove(pos) else {
                    continue;
                };

                let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
                let (outcome_tx, outcome_rx) = oneshot::channel();
                let assignment = Assignment {
                    peer: peer.id(),
                    request_id,
                    outcome: outcome_rx,
                };
                if queued.assign.send(assignment).is_err() {
                    continue;
                }
                state.pending.insert(
                    request_id,
                    InFlight {
                        peer: peer.id(),
                        kind: queued.request.request.kind(),
                        outcome: outcome_tx,
                    },
                );
                state.busy.insert(peer.id());
                dispatches.push((peer, request_id, queued.request.request));
            }
        }

        for (peer, request_id, request) in dispatches {
            trace!(peer = %peer.id(), request_id, kind = %request.kind(), "Dispatching request");
            if let Err(e) = request.dispatch(&peer, request_id) {
                debug!(peer = %peer.id(), request_id, error = %e, "Request send failed");
                self.fail_in_flight(request_id);
            }
        }
    }

    /// Route a response to the fetch waiting for it.
    pub fn deliver(
        &self,
        peer: PeerId,
        request_id: u64,
        response: Response,
    ) -> Result<(), DeliveryError> {
        let in_flight = {
            let mut state = self.state.lock();
            let Some(in_flight) = state.pending.get(&request_id) else {
                return Err(DeliveryError::UnknownRequest);
            };
            if in_flight.peer != peer {
                return Err(DeliveryError::PeerMismatch {
                    expected: in_flight.peer,
                    got: peer,
                });
            }
            if in_flight.kind != response.kind() {
                return Err(DeliveryError::KindMismatch {
                    expected: in_flight.kind,
                    got: response.kind(),
                });
            }
            let Some(in_flight) = state.pending.remove(&request_id) else {
                return Err(DeliveryError::UnknownRequest);
            };
            state.busy.remove(&peer);
            state.timeouts.remove(&peer);
            in_flight
        };
        trace!(peer = %peer, request_id, items = response.len(), "Response delivered");
        let _ = in_flight.outcome.send(Outcome::Delivered(response));
        self.assign();
        Ok(())
    }

    /// Free a peer that disconnected and fail its in-flight request over.
    pub fn peer_dropped(&self, peer: &PeerId) {
        let lost: Vec<InFlight> = {
            let mut state = self.state.lock();
            state.busy.remove(peer);
            state.timeouts.remove(peer);
            let ids: Vec<u64> = state
                .pending
                .iter()
                .filter(|(_, f)| f.peer == *peer)
                .map(|(id, _)| *id)
                .collect();
            ids.iter().filter_map(|id| state.pending.remove(id)).collect()
        };
        for in_flight in lost {
            let _ = in_flight.outcome.send(Outcome::PeerLost);
        }
        self.assign();
    }

    /// Re-run assignment after the peer set changed.
    pub fn peers_changed(&self) {
        self.assign();
    }

    /// Forget an in-flight request without penalizing the peer.
    fn release(&self, peer: PeerId, request_id: u64) {
        {
            let mut state = self.state.lock();
            if state.pending.remove(&request_id).is_some() {
                state.busy.remove(&peer);
            }
        }
        self.assign();
    }

    /// Fail an in-flight request whose send failed.
    fn fail_in_flight(&self, request_id: u64) {
        let in_flight = {
            let mut state = self.state.lock();
            let Some(in_flight) = state.pending.remove(&request_id) else {
                return;
            };
            state.busy.remove(&in_flight.peer);
            in_flight
        };
        let _ = in_flight.outcome.send(Outcome::PeerLost);
    }

    /// Record a timeout. Returns `false` if the request was no longer pending.
    fn expire(&self, peer: PeerId, request_id: u64) -> bool {
        let disconnect = {
            let mut state = self.state.lock();
            if state.pending.remove(&request_id).is_none() {
                return false;
            }
            state.busy.remove(&peer);
            let count = state.timeouts.entry(peer).or_insert(0);
            *count += 1;
            if *count >= self.config.max_peer_timeouts {
                state.timeouts.remove(&peer);
                true
            } else {
                false
            }
        };
        if disconnect {
            if let Some(p) = self.peers.peer(&peer) {
                warn!(peer = %peer, "Disconnecting peer after repeated timeouts");
                p.disconnect(DisconnectReason::Timeout);
            }
        }
        self.assign();
        true
    }

    /// Fail every queued and in-flight request with `Closed`.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.queue.clear();
        state.pending.clear();
        state.busy.clear();
    }

    pub fn stats(&self) -> DistributorStats {
        let state = self.state.lock();
        DistributorStats {
            queued: state.queue.len(),
            in_flight: state.pending.len(),
            busy_peers: state.busy.len(),
        }
    }
}
