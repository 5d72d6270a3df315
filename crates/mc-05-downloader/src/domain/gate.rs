//! One-way fast-sync switch.

use std::sync::atomic::{AtomicBool, Ordering};

/// Whether the next attempt may use fast sync.
///
/// Starts enabled only on an empty chain and is never re-enabled.
#[derive(Debug)]
pub struct FastSyncGate {
    enabled: AtomicBool,
}

impl FastSyncGate {
    /// Gate for a chain whose head is at `head_number`.
    pub fn for_head(head_number: u64) -> Self {
        Self {
            enabled: AtomicBool::new(head_number == 0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Returns whether this call switched the gate off.
    pub fn disable(&self) -> bool {
        self.enabled.swap(false, Ordering::AcqRel)
    }
}
