//! # Request Distributor
//!
//! Matches header, body, receipt and state-node requests to capable peers.
//!
//! ## Rules
//!
//! | Rule | Behavior |
//! |------|----------|
//! | Ordering | FIFO queue; free peers by descending TD pick the oldest request they can serve |
//! | Concurrency | At most one in-flight request per peer |
//! | Capability | Receipts need version 63+; node data needs 63+ or the snap extension |
//! | Timeout | Peer freed and excluded, request requeued at the front; pinned requests fail |
//! | Penalty | `max_peer_timeouts` consecutive timeouts disconnect the peer |
//! | No peers | Wait for one to register, fail with `NoPeers` after `no_peer_timeout` |
//! | Cancellation | Every wait observes the caller's `CancellationToken` |
//!
//! Late replies (after timeout or cancellation) are rejected by `deliver` with
//! `UnknownRequest` and never reach a caller.

pub mod config;
pub mod domain;
pub mod service;

pub use config::DistributorConfig;
pub use domain::{
    Delivery, DeliveryError, DistributorError, FetchRequest, Request, RequestKind, Response,
};
pub use service::{DistributorStats, RequestDistributor};
