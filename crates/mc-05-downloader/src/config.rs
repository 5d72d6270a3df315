//! # Downloader Configuration

use serde::{Deserialize, Serialize};

/// Batch sizes and limits of one sync attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    /// Headers per request.
    pub max_header_fetch: u64,

    /// Block hashes per body or receipt request.
    pub max_block_fetch: usize,

    /// Node hashes per state request.
    pub max_state_fetch: usize,

    /// Concurrent state-sync workers.
    pub state_workers: usize,

    /// Blocks below the remote head that are imported in full during fast
    /// sync. The pivot sits this far below the remote head.
    pub fs_min_full_blocks: u64,

    /// Requests of one chunk before the attempt fails.
    pub max_retrievals: u32,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            max_header_fetch: 192,
            max_block_fetch: 128,
            max_state_fetch: 384,
            state_workers: 4,
            fs_min_full_blocks: 64,
            max_retrievals: 8,
        }
    }
}

impl DownloaderConfig {
    /// Small batches so multi-batch paths run on short test chains.
    pub fn for_testing() -> Self {
        Self {
            max_header_fetch: 4,
            max_block_fetch: 3,
            max_state_fetch: 4,
            state_workers: 2,
            fs_min_full_blocks: 3,
            max_retrievals: 4,
        }
    }
}
