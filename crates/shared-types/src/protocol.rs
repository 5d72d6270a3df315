//! # Peer Wire Protocol
//!
//! Messages exchanged with remote peers and the capability types negotiated
//! in the `Status` handshake.
//!
//! | Request | Response | Served by |
//! |---------|----------|-----------|
//! | `GetBlockHeaders` | `BlockHeaders` | any version |
//! | `GetBlockBodies` | `BlockBodies` | any version |
//! | `GetReceipts` | `Receipts` | version ≥ 63 |
//! | `GetNodeData` | `NodeData` | version ≥ 63 or `snap` extension |
//!
//! Every request carries a `request_id` echoed by its response.

use crate::entities::{Block, BlockBody, BlockHeader, Hash, HashOrNumber, PeerId, Receipt, Transaction, U256};
use crate::errors::ProtocolError;
use bincode::Options;
use serde::{Deserialize, Serialize};

/// Name of the base chain protocol.
pub const BASE_PROTOCOL: &str = "mer";

/// Name of the satellite state-sync extension.
pub const SNAP_PROTOCOL: &str = "snap";

/// First version serving receipts and node data.
pub const VERSION_63: u32 = 63;
pub const VERSION_64: u32 = 64;
pub const VERSION_65: u32 = 65;

/// Versions this node speaks, newest first.
pub const SUPPORTED_VERSIONS: &[u32] = &[VERSION_65, VERSION_64, VERSION_63];

/// Upper bound on an encoded message.
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// A protocol advertised by a peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    pub version: u32,
}

impl Capability {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    pub fn base(version: u32) -> Self {
        Self::new(BASE_PROTOCOL, version)
    }

    pub fn snap() -> Self {
        Self::new(SNAP_PROTOCOL, 1)
    }
}

/// Handshake payload, the first message on every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub peer_id: PeerId,
    pub protocol_version: u32,
    pub network_id: u64,
    /// Total difficulty of the sender's head.
    pub td: U256,
    pub head: Hash,
    pub genesis: Hash,
    pub capabilities: Vec<Capability>,
}

/// Why a connection is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    Requested,
    UselessPeer,
    TooManyPeers,
    AlreadyConnected,
    ProtocolError,
    NetworkMismatch,
    GenesisMismatch,
    IncompatibleVersion,
    Timeout,
    UnreliablePeer,
    ClientQuitting,
}

/// Hash and number of an announced block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockAnnouncement {
    pub hash: Hash,
    pub number: u64,
}

/// A protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Status(Status),
    GetBlockHeaders {
        request_id: u64,
        origin: HashOrNumber,
        amount: u64,
        skip: u64,
        reverse: bool,
    },
    BlockHeaders {
        request_id: u64,
        headers: Vec<BlockHeader>,
    },
    GetBlockBodies {
        request_id: u64,
        hashes: Vec<Hash>,
    },
    BlockBodies {
        request_id: u64,
        bodies: Vec<BlockBody>,
    },
    GetReceipts {
        request_id: u64,
        hashes: Vec<Hash>,
    },
    Receipts {
        request_id: u64,
        receipts: Vec<Vec<Receipt>>,
    },
    GetNodeData {
        request_id: u64,
        hashes: Vec<Hash>,
    },
    NodeData {
        request_id: u64,
        nodes: Vec<Vec<u8>>,
    },
    NewBlockHashes(Vec<BlockAnnouncement>),
    NewBlock {
        block: Block,
        td: U256,
    },
    Transactions(Vec<Transaction>),
    Disconnect(DisconnectReason),
}

fn codec() -> impl Options {
    bincode::options().with_limit(MAX_MESSAGE_SIZE as u64)
}

impl Message {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        codec()
            .serialize(self)
            .map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::TooLarge {
                size: bytes.len(),
                limit: MAX_MESSAGE_SIZE,
            });
        }
        codec()
            .deserialize(bytes)
            .map_err(|e| ProtocolError::Decode(e.to_string()))
    }

    /// Short name for logs and metrics labels.
    pub fn name(&self) -> &'static str {
        match self {
            Message::Status(_) => "Status",
            Message::GetBlockHeaders { .. } => "GetBlockHeaders",
            Message::BlockHeaders { .. } => "BlockHeaders",
            Message::GetBlockBodies { .. } => "GetBlockBodies",
            Message::BlockBodies { .. } => "BlockBodies",
            Message::GetReceipts { .. } => "GetReceipts",
            Message::Receipts { .. } => "Receipts",
            Message::GetNodeData { .. } => "GetNodeData",
            Message::NodeData { .. } => "NodeData",
            Message::NewBlockHashes(_) => "NewBlockHashes",
            Message::NewBlock { .. } => "NewBlock",
            Message::Transactions(_) => "Transactions",
            Message::Disconnect(_) => "Disconnect",
        }
    }

    /// Correlation id of a request or response.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Message::GetBlockHeaders { request_id, .. }
            | Message::BlockHeaders { request_id, .. }
            | Message::GetBlockBodies { request_id, .. }
            | Message::BlockBodies { request_id, .. }
            | Message::GetReceipts { request_id, .. }
            | Message::Receipts { request_id, .. }
            | Message::GetNodeData { request_id, .. }
            | Message::NodeData { request_id, .. } => Some(*request_id),
            _ => None,
        }
    }
}
