//! # Downloader
//!
//! Brings the local chain up to a remote peer's head.
//!
//! ## Attempt
//!
//! ```text
//!            synchronise
//!                 │
//!   Idle ─→ FetchingHeaders ─→ FetchingBodiesAndReceipts ─→ Committing ─┐
//!                 ▲                                             │        │
//!                 │                              pivot stored   ▼        │
//!                 │                                   FetchingState      │
//!                 └──────────────── next batch ◀──────────────────────────┘
//!                                                      │
//!                                    remote head ─→ Idle     error ─→ Failed
//! ```
//!
//! | Stage | Source | Check |
//! |-------|--------|-------|
//! | Headers | Target peer only | Parent link, number, `verify_header` |
//! | Bodies | Any peer, concurrent chunks | Transactions root and uncle hash |
//! | Receipts | Any peer, fast mode up to the pivot | Receipts root |
//! | State | Any peer, worker pool | Node hash |
//!
//! A bad header chain drops the target peer and ends the attempt. A bad body,
//! receipt list or node excludes the sending peer and the data is requested
//! again elsewhere.
//!
//! ## Fast Sync
//!
//! The pivot is `fs_min_full_blocks` below the remote head. Blocks up to the
//! pivot are stored with receipts and not executed, the pivot state is
//! downloaded and the pivot becomes the head; later blocks are executed. The
//! [`FastSyncGate`] tells callers whether fast sync is still allowed.

pub mod config;
pub mod domain;
pub mod metrics;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::DownloaderConfig;
pub use domain::{FastSyncGate, SyncError, SyncMode, SyncProgress, SyncReport, SyncState};
pub use service::Downloader;
