//! Downloader domain: errors, sync types, the fast-sync gate, the download
//! queue and the state-sync scheduler.

pub mod errors;
pub mod gate;
pub mod queue;
pub mod state_sync;
pub mod types;

pub use errors::SyncError;
pub use gate::FastSyncGate;
pub use queue::{DownloadQueue, FetchResult};
pub use state_sync::{NodeDelivery, StateScheduler};
pub use types::{SyncMode, SyncProgress, SyncReport, SyncState};
