//! # Chain Events
//!
//! Every event published on the bus, grouped by topic.

use serde::{Deserialize, Serialize};
use shared_types::{Block, BlockHeader, Hash, Log, PeerId, Transaction};

/// All events that can be published to the event bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChainEvent {
    // =========================================================================
    // CHAIN
    // =========================================================================
    /// The canonical head changed. Emitted once per insert call or reorg,
    /// after every `ChainSide` of the same change.
    ChainHead(BlockHeader),

    /// A block is stored but not canonical: either a side block that lost fork
    /// choice or a block detached by a reorg.
    ChainSide(Block),

    // =========================================================================
    // LOGS
    // =========================================================================
    /// Logs of newly canonical blocks.
    NewLogs(Vec<Log>),

    /// Logs of detached blocks, marked `removed`.
    RemovedLogs(Vec<Log>),

    // =========================================================================
    // TRANSACTION POOL
    // =========================================================================
    /// Transactions that became executable in the pool.
    NewPendingTransactions(Vec<Transaction>),

    // =========================================================================
    // SYNC
    // =========================================================================
    /// A sync attempt started.
    SyncStarted {
        /// Common ancestor with the remote chain.
        origin: u64,
        /// Remote head number.
        target: u64,
    },

    /// A sync attempt finished successfully.
    SyncCompleted { head: u64, head_hash: Hash },

    /// A sync attempt failed or was cancelled.
    SyncFailed { reason: String },

    // =========================================================================
    // PEERS
    // =========================================================================
    PeerConnected(PeerId),

    PeerDisconnected(PeerId),
}

impl ChainEvent {
    /// Get the topic for this event (for filtering).
    #[must_use]
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::ChainHead(_) => EventTopic::ChainHead,
            Self::ChainSide(_) => EventTopic::ChainSide,
            Self::NewLogs(_) | Self::RemovedLogs(_) => EventTopic::Logs,
            Self::NewPendingTransactions(_) => EventTopic::Transactions,
            Self::SyncStarted { .. } | Self::SyncCompleted { .. } | Self::SyncFailed { .. } => {
                EventTopic::Sync
            }
            Self::PeerConnected(_) | Self::PeerDisconnected(_) => EventTopic::Peers,
        }
    }
}

/// Event topics for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    ChainHead,
    ChainSide,
    Logs,
    Transactions,
    Sync,
    Peers,
    /// All events (no filtering).
    All,
}

/// Filter for subscribing to specific events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Topics to include. Empty means all topics.
    pub topics: Vec<EventTopic>,
}

impl EventFilter {
    /// Create a filter that accepts all events.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter for specific topics.
    #[must_use]
    pub fn topics(topics: Vec<EventTopic>) -> Self {
        Self { topics }
    }

    /// Check if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &ChainEvent) -> bool {
        self.topics.is_empty()
            || self.topics.contains(&EventTopic::All)
            || self.topics.contains(&event.topic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_topic_mapping() {
        assert_eq!(
            ChainEvent::ChainHead(BlockHeader::default()).topic(),
            EventTopic::ChainHead
        );
        assert_eq!(ChainEvent::RemovedLogs(vec![]).topic(), EventTopic::Logs);
        assert_eq!(
            ChainEvent::SyncFailed {
                reason: "x".into()
            }
            .topic(),
            EventTopic::Sync
        );
    }

    #[test]
    fn test_filter_all() {
        let filter = EventFilter::all();
        assert!(filter.matches(&ChainEvent::ChainSide(Block::default())));
        assert!(filter.matches(&ChainEvent::PeerConnected(PeerId::default())));
    }

    #[test]
    fn test_filter_by_topic() {
        let filter = EventFilter::topics(vec![EventTopic::ChainHead, EventTopic::Sync]);
        assert!(filter.matches(&ChainEvent::ChainHead(BlockHeader::default())));
        assert!(filter.matches(&ChainEvent::SyncCompleted {
            head: 1,
            head_hash: [0u8; 32]
        }));
        assert!(!filter.matches(&ChainEvent::ChainSide(Block::default())));
    }
}
