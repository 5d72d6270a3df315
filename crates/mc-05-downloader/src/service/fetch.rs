//! Header, body and receipt retrieval.

use super::{label, Downloader};
use crate::domain::{DownloadQueue, SyncError, SyncMode};
use crate::metrics;
use futures::future::join_all;
use mc_01_peer_set::Peer;
use mc_02_request_distributor::{DistributorError, FetchRequest, Request, RequestKind, Response};
use shared_types::protocol::DisconnectReason;
use shared_types::{receipts_root, BlockBody, BlockHeader, Hash, PeerId, Receipt};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A per-block item fetched by hash and checked against its header.
pub(super) trait Retrieval {
    type Item: Send;
    const KIND: RequestKind;

    fn request(hashes: Vec<Hash>) -> Request;

    fn items(response: Response) -> Vec<Self::Item>;

    /// Why `item` does not belong to `header`, if it does not.
    fn verify(header: &BlockHeader, item: &Self::Item) -> Result<(), &'static str>;
}

pub(super) struct Bodies;

impl Retrieval for Bodies {
    type Item = BlockBody;
    const KIND: RequestKind = RequestKind::Bodies;

    fn request(hashes: Vec<Hash>) -> Request {
        Request::Bodies(hashes)
    }

    fn items(response: Response) -> Vec<BlockBody> {
        match response {
            Response::Bodies(bodies) => bodies,
            _ => Vec::new(),
        }
    }

    fn verify(header: &BlockHeader, body: &BlockBody) -> Result<(), &'static str> {
        if body.matches(header) {
            Ok(())
        } else {
            Err("body root mismatch")
        }
    }
}

pub(super) struct Receipts;

impl Retrieval for Receipts {
    type Item = Vec<Receipt>;
    const KIND: RequestKind = RequestKind::Receipts;

    fn request(hashes: Vec<Hash>) -> Request {
        Request::Receipts(hashes)
    }

    fn items(response: Response) -> Vec<Vec<Receipt>> {
        match response {
            Response::Receipts(receipts) => receipts,
            _ => Vec::new(),
        }
    }

    fn verify(header: &BlockHeader, receipts: &Vec<Receipt>) -> Result<(), &'static str> {
        if receipts_root(receipts) == header.receipts_root {
            Ok(())
        } else {
            Err("receipts root mismatch")
        }
    }
}

impl Downloader {
    // =========================================================================
    // HEADERS
    // =========================================================================

    /// The header the peer announced as its head.
    pub(super) async fn fetch_head(
        &self,
        peer: &Peer,
        head_hash: Hash,
        cancel: &CancellationToken,
    ) -> Result<BlockHeader, SyncError> {
        let request = FetchRequest::new(Request::HeadersByHash {
            origin: head_hash,
            amount: 1,
            skip: 0,
            reverse: false,
        })
        .pinned_to(peer.id());
        let delivery = self.request(request, cancel).await?;
        match delivery.response {
            Response::Headers(mut headers) if headers.len() == 1 && headers[0].hash() == head_hash => {
                metrics::record_in("headers", 1);
                Ok(headers.remove(0))
            }
            _ => Err(self.reject_headers(peer, 0, "head header missing or mismatched".into())),
        }
    }

    /// The peer's header at `number`, `None` if it sent nothing.
    async fn fetch_header_at(
        &self,
        peer: &Peer,
        number: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<BlockHeader>, SyncError> {
        let request = FetchRequest::new(Request::HeadersByNumber {
            origin: number,
            amount: 1,
            skip: 0,
            reverse: false,
        })
        .pinned_to(peer.id());
        let delivery = self.request(request, cancel).await?;
        let Response::Headers(mut headers) = delivery.response else {
            return Ok(None);
        };
        match headers.len() {
            0 => Ok(None),
            1 if headers[0].number == number => Ok(headers.pop()),
            _ => Err(self.reject_headers(peer, number, "unexpected header for ancestor lookup".into())),
        }
    }

    /// Highest block both chains share.
    ///
    /// The genesis hashes must match. The search checks the highest shared
    /// height first, then bisects with single-header requests.
    pub(super) async fn find_ancestor(
        &self,
        peer: &Peer,
        remote: &BlockHeader,
        mode: SyncMode,
        cancel: &CancellationToken,
    ) -> Result<BlockHeader, SyncError> {
        let local_genesis = self.chain.genesis().header.clone();
        let remote_genesis = self
            .fetch_header_at(peer, 0, cancel)
            .await?
            .ok_or_else(|| SyncError::InvalidAncestor("peer did not serve its genesis".into()))?;
        if remote_genesis.hash() != local_genesis.hash() {
            return Err(SyncError::InvalidAncestor(format!(
                "genesis {} does not match local {}",
                hex::encode(remote_genesis.hash()),
                hex::encode(local_genesis.hash())
            )));
        }

        let local_height = match mode {
            SyncMode::Full => self.chain.current_header().number,
            SyncMode::Fast => self
                .chain
                .current_header()
                .number
                .max(self.chain.current_fast_block().number()),
        };
        let mut hi = remote.number.min(local_height);
        if hi == 0 {
            return Ok(local_genesis);
        }
        if let Some(header) = self.known_at(peer, hi, mode, cancel).await? {
            return Ok(header);
        }

        // `lo` is shared, `hi` is not.
        let mut lo = 0u64;
        let mut ancestor = local_genesis;
        while lo + 1 < hi {
            let mid = lo + (hi - lo) / 2;
            match self.known_at(peer, mid, mode, cancel).await? {
                Some(header) => {
                    lo = mid;
                    ancestor = header;
                }
                None => hi = mid,
            }
        }
        Ok(ancestor)
    }

    /// The peer's header at `number` if we hold that block.
    async fn known_at(
        &self,
        peer: &Peer,
        number: u64,
        mode: SyncMode,
        cancel: &CancellationToken,
    ) -> Result<Option<BlockHeader>, SyncError> {
        let Some(header) = self.fetch_header_at(peer, number, cancel).await? else {
            return Ok(None);
        };
        let known = self.chain.has_block(&header.hash())
            && (mode == SyncMode::Fast || self.chain.has_state(&header.state_root));
        Ok(known.then_some(header))
    }

    /// The next `amount` headers above `parent` from the target peer, linked
    /// and verified.
    pub(super) async fn fetch_headers(
        &self,
        peer: &Peer,
        parent: &BlockHeader,
        amount: u64,
        cancel: &CancellationToken,
    ) -> Result<Vec<BlockHeader>, SyncError> {
        let from = parent.number + 1;
        let request = FetchRequest::new(Request::HeadersByNumber {
            origin: from,
            amount,
            skip: 0,
            reverse: false,
        })
        .pinned_to(peer.id());
        let delivery = self.request(request, cancel).await?;
        let Response::Headers(headers) = delivery.response else {
            return Err(self.reject_headers(peer, from, "unexpected response".into()));
        };
        if headers.is_empty() {
            return Err(self.reject_headers(peer, from, "empty header batch".into()));
        }
        if headers.len() as u64 > amount {
            return Err(self.reject_headers(peer, from, "more headers than requested".into()));
        }

        let mut prev = parent;
        for header in &headers {
            if header.number != prev.number + 1 {
                return Err(self.reject_headers(
                    peer,
                    header.number,
                    format!("expected number {}", prev.number + 1),
                ));
            }
            if header.parent_hash != prev.hash() {
                return Err(self.reject_headers(peer, header.number, "broken parent link".into()));
            }
            if let Err(e) = self.chain.engine().verify_header(header, prev) {
                return Err(self.reject_headers(peer, header.number, e.to_string()));
            }
            prev = header;
        }

        metrics::record_in("headers", headers.len());
        debug!(peer = %peer.id(), from, count = headers.len(), "Header batch verified");
        Ok(headers)
    }

    /// Drop the target peer as unreliable.
    fn reject_headers(&self, peer: &Peer, number: u64, reason: String) -> SyncError {
        warn!(peer = %peer.id(), number, %reason, "Invalid header chain, dropping peer");
        metrics::record_dropped("headers", 1);
        peer.disconnect(DisconnectReason::UnreliablePeer);
        SyncError::InvalidHeaders {
            peer: peer.id(),
            number,
            reason,
        }
    }

    // =========================================================================
    // BODIES AND RECEIPTS
    // =========================================================================

    pub(super) async fn fetch_bodies(
        &self,
        queue: &mut DownloadQueue,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let missing = queue.missing_bodies();
        if missing.is_empty() {
            return Ok(());
        }
        for (number, body) in self.fetch_all::<Bodies>(missing, cancel).await? {
            queue.deliver_body(number, body);
        }
        Ok(())
    }

    pub(super) async fn fetch_receipts(
        &self,
        queue: &mut DownloadQueue,
        cancel: &CancellationToken,
    ) -> Result<(), SyncError> {
        let missing = queue.missing_receipts();
        if missing.is_empty() {
            return Ok(());
        }
        for (number, receipts) in self.fetch_all::<Receipts>(missing, cancel).await? {
            queue.deliver_receipts(number, receipts);
        }
        Ok(())
    }

    /// Fetch items for `headers` in concurrent chunks of `max_block_fetch`.
    async fn fetch_all<R: Retrieval>(
        &self,
        headers: Vec<BlockHeader>,
        cancel: &CancellationToken,
    ) -> Result<Vec<(u64, R::Item)>, SyncError> {
        let chunks = headers
            .chunks(self.config.max_block_fetch.max(1))
            .map(|chunk| self.fetch_chunk::<R>(chunk, cancel));
        let mut items = Vec::with_capacity(headers.len());
        for result in join_all(chunks).await {
            items.extend(result?);
        }
        Ok(items)
    }

    /// Drop a peer that served an item not matching its header.
    fn reject_delivery<R: Retrieval>(&self, id: &PeerId, number: u64, reason: &str) {
        warn!(peer = %id, number, kind = %R::KIND, reason, "Invalid delivery, dropping peer");
        metrics::record_dropped(label(R::KIND), 1);
        if let Some(peer) = self.peers.peer(id) {
            peer.disconnect(DisconnectReason::UnreliablePeer);
        }
        self.distributor.peer_dropped(id);
    }

    /// Fetch one chunk from any peer.
    ///
    /// The verified prefix of each delivery is kept and the rest re-requested.
    /// A peer that sends a mismatching item is dropped, one that sends nothing
    /// at all is excluded for the rest of the chunk.
    async fn fetch_chunk<R: Retrieval>(
        &self,
        headers: &[BlockHeader],
        cancel: &CancellationToken,
    ) -> Result<Vec<(u64, R::Item)>, SyncError> {
        let from = headers.first().map_or(0, |h| h.number);
        let mut remaining = headers;
        let mut items = Vec::with_capacity(headers.len());
        let mut exclude: HashSet<PeerId> = HashSet::new();
        let mut attempts = 0u32;

        while !remaining.is_empty() {
            if attempts >= self.config.max_retrievals {
                return Err(SyncError::RetrievalFailed {
                    kind: R::KIND,
                    from,
                    attempts,
                });
            }
            attempts += 1;

            let hashes = remaining.iter().map(BlockHeader::hash).collect();
            let request = FetchRequest::new(R::request(hashes)).excluding(exclude.iter().copied());
            let delivery = match self.request(request, cancel).await {
                Ok(delivery) => delivery,
                Err(SyncError::Fetch(DistributorError::Timeout | DistributorError::PeerDropped)) => {
                    continue
                }
                Err(SyncError::Fetch(DistributorError::NoPeers)) => {
                    return Err(SyncError::RetrievalFailed {
                        kind: R::KIND,
                        from,
                        attempts,
                    })
                }
                Err(e) => return Err(e),
            };

            let mut accepted = 0;
            let mut fault = None;
            for (header, item) in remaining.iter().zip(R::items(delivery.response)) {
                if let Err(reason) = R::verify(header, &item) {
                    fault = Some((header.number, reason));
                    break;
                }
                items.push((header.number, item));
                accepted += 1;
            }
            remaining = &remaining[accepted..];
            metrics::record_in(label(R::KIND), accepted);

            if let Some((number, reason)) = fault {
                self.reject_delivery::<R>(&delivery.peer, number, reason);
                exclude.insert(delivery.peer);
            } else if accepted == 0 {
                debug!(peer = %delivery.peer, kind = %R::KIND, from, "Empty delivery, excluding peer");
                exclude.insert(delivery.peer);
            }
        }
        Ok(items)
    }
}
