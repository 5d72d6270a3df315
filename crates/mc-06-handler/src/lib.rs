//! # Protocol Handler
//!
//! Runs the wire protocol on every connection and ties the node's
//! components to the network.
//!
//! ```text
//!   transport ──(conn, inbound)──→ Handler::run_peer
//!                                      │
//!            ┌────────────┬────────────┼──────────────┬───────────────┐
//!            ▼            ▼            ▼              ▼               ▼
//!         PeerSet   serve Get*   responses ─→   NewBlock(Hashes)  Transactions
//!                   from chain   distributor    import / syncer   TxPool
//!
//!   ChainSyncer: peer joins + interval ─→ best peer ─→ Downloader::synchronise
//! ```
//!
//! ## Handshake
//!
//! Both sides send `Status` first. The connection is dropped with a
//! `Disconnect` when the network id, genesis or protocol version differ, when
//! the remote is this node, or when the peer limit is reached. Peers that
//! advertise `snap` are registered only once their extension arrives.
//!
//! ## Transaction Acceptance
//!
//! Remote transactions are dropped until the node has completed a sync or
//! imported a propagated block.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use adapters::{MessagePipe, PipeEnd, TcpConnection, TcpReceiver, TcpTransport};
pub use config::HandlerConfig;
pub use domain::HandlerError;
pub use ports::MessageSource;
pub use service::{Handler, SyncOp};
