//! Requests, responses and the capability rules that match them to peers.

use mc_01_peer_set::{ConnectionError, Peer};
use shared_types::protocol::{Message, VERSION_63};
use shared_types::{BlockBody, BlockHeader, Hash, PeerId, Receipt};
use std::collections::HashSet;
use std::fmt;

/// Kind of data a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Headers,
    Bodies,
    Receipts,
    NodeData,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::Headers => "headers",
            RequestKind::Bodies => "bodies",
            RequestKind::Receipts => "receipts",
            RequestKind::NodeData => "node data",
        };
        f.write_str(name)
    }
}

/// A data request, without its correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    HeadersByHash {
        origin: Hash,
        amount: u64,
        skip: u64,
        reverse: bool,
    },
    HeadersByNumber {
        origin: u64,
        amount: u64,
        skip: u64,
        reverse: bool,
    },
    Bodies(Vec<Hash>),
    Receipts(Vec<Hash>),
    NodeData(Vec<Hash>),
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::HeadersByHash { .. } | Request::HeadersByNumber { .. } => RequestKind::Headers,
            Request::Bodies(_) => RequestKind::Bodies,
            Request::Receipts(_) => RequestKind::Receipts,
            Request::NodeData(_) => RequestKind::NodeData,
        }
    }

    /// Send the request to `peer` under `request_id`.
    pub(crate) fn dispatch(&self, peer: &Peer, request_id: u64) -> Result<(), ConnectionError> {
        match self {
            Request::HeadersByHash {
                origin,
                amount,
                skip,
                reverse,
            } => peer.request_headers_by_hash(request_id, *origin, *amount, *skip, *reverse),
            Request::HeadersByNumber {
                origin,
                amount,
                skip,
                reverse,
            } => peer.request_headers_by_number(request_id, *origin, *amount, *skip, *reverse),
            Request::Bodies(hashes) => peer.request_bodies(request_id, hashes.clone()),
            Request::Receipts(hashes) => peer.request_receipts(request_id, hashes.clone()),
            Request::NodeData(hashes) => peer.request_node_data(request_id, hashes.clone()),
        }
    }
}

/// A request plus its peer constraints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub request: Request,
    /// Only this peer may serve the request.
    pub target: Option<PeerId>,
    /// These peers may not serve the request.
    pub exclude: HashSet<PeerId>,
}

impl FetchRequest {
    pub fn new(request: Request) -> Self {
        Self {
            request,
            target: None,
            exclude: HashSet::new(),
        }
    }

    /// Pin the request to one peer. A timeout then fails the fetch instead of
    /// reassigning it.
    pub fn pinned_to(mut self, peer: PeerId) -> Self {
        self.target = Some(peer);
        self
    }

    pub fn excluding(mut self, peers: impl IntoIterator<Item = PeerId>) -> Self {
        self.exclude.extend(peers);
        self
    }

    pub fn is_pinned(&self) -> bool {
        self.target.is_some()
    }

    /// Whether `peer` may serve this request. `has_snap` tells whether the peer
    /// runs the snap extension.
    pub fn can_serve(&self, peer: &Peer, has_snap: bool) -> bool {
        if self.target.is_some_and(|t| t != peer.id()) || self.exclude.contains(&peer.id()) {
            return false;
        }
        match self.request.kind() {
            RequestKind::Headers | RequestKind::Bodies => true,
            RequestKind::Receipts => peer.version() >= VERSION_63,
            RequestKind::NodeData => peer.version() >= VERSION_63 || has_snap,
        }
    }
}

/// A response payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Headers(Vec<BlockHeader>),
    Bodies(Vec<BlockBody>),
    Receipts(Vec<Vec<Receipt>>),
    NodeData(Vec<Vec<u8>>),
}

impl Response {
    pub fn kind(&self) -> RequestKind {
        match self {
            Response::Headers(_) => RequestKind::Headers,
            Response::Bodies(_) => RequestKind::Bodies,
            Response::Receipts(_) => RequestKind::Receipts,
            Response::NodeData(_) => RequestKind::NodeData,
        }
    }

    /// Number of items delivered.
    pub fn len(&self) -> usize {
        match self {
            Response::Headers(v) => v.len(),
            Response::Bodies(v) => v.len(),
            Response::Receipts(v) => v.len(),
            Response::NodeData(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Split a response message into its correlation id and payload.
    /// Returns `None` for messages that are not responses.
    pub fn from_message(message: Message) -> Option<(u64, Response)> {
        match message {
            Message::BlockHeaders {
                request_id,
                headers,
            } => Some((request_id, Response::Headers(headers))),
            Message::BlockBodies { request_id, bodies } => {
                Some((request_id, Response::Bodies(bodies)))
            }
            Message::Receipts {
                request_id,
                receipts,
            } => Some((request_id, Response::Receipts(receipts))),
            Message::NodeData { request_id, nodes } => Some((request_id, Response::NodeData(nodes))),
            _ => None,
        }
    }
}

/// A response together with the peer that served it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub peer: PeerId,
    pub request_id: u64,
    pub response: Response,
}
