//! Sync modes, attempt states and reports.

use serde::{Deserialize, Serialize};
use shared_types::Hash;
use std::fmt;

/// How blocks below the remote head are imported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    /// Execute every block.
    Full,
    /// Store blocks and receipts up to a pivot, download the pivot state and
    /// execute only the blocks above it.
    Fast,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Full => f.write_str("full"),
            SyncMode::Fast => f.write_str("fast"),
        }
    }
}

/// Stage of the running attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    #[default]
    Idle,
    FetchingHeaders,
    FetchingBodiesAndReceipts,
    FetchingState,
    Committing,
    Failed,
}

/// Progress of the current or last attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SyncProgress {
    /// Local head when the attempt started.
    pub starting_block: u64,
    /// Highest committed block.
    pub current_block: u64,
    /// Remote head number.
    pub highest_block: u64,
    /// State nodes downloaded.
    pub pulled_states: u64,
    /// State nodes known so far, downloaded or scheduled.
    pub known_states: u64,
}

/// Outcome of a successful attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub mode: SyncMode,
    /// Common ancestor the attempt started from.
    pub origin: u64,
    pub head: u64,
    pub head_hash: Hash,
    /// Blocks committed by this attempt.
    pub imported: u64,
    /// Fast-sync pivot, if state was downloaded.
    pub pivot: Option<u64>,
}
