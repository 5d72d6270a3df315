//! # Shared Bus - Chain Event Feed
//!
//! Typed publish/subscribe feed for chain, log, pool, sync and peer events.
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │  BlockChain  │                    │    TxPool    │
//! │              │    publish()       │  Downloader  │
//! │              │ ──────┐            │   Handler    │
//! └──────────────┘       │            └──────────────┘
//!                        ▼                    ↑
//!                  ┌──────────────┐          │
//!                  │  Event Bus   │          │
//!                  │              │ ─────────┘
//!                  └──────────────┘  subscribe()
//! ```
//!
//! ## Delivery
//!
//! - Publishing never blocks the publisher.
//! - Each subscriber buffers up to [`DEFAULT_CHANNEL_CAPACITY`] events; beyond
//!   that it observes [`SubscriptionError::Lagged`].
//! - Within one topic, events arrive in publication order.
//! - Unsubscribing (or dropping the handle) detaches immediately.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod events;
pub mod publisher;
pub mod subscriber;

// Re-export main types
pub use events::{ChainEvent, EventFilter, EventTopic};
pub use publisher::{EventPublisher, InMemoryEventBus};
pub use subscriber::{EventStream, Subscription, SubscriptionError};

/// Maximum events buffered per subscriber before it starts lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

#[cfg(test)]
mod tests {
    use super::*;
    use shared_types::BlockHeader;

    #[tokio::test]
    async fn test_bus_roundtrip_through_reexports() {
        let bus = InMemoryEventBus::new();
        let mut sub = bus.subscribe(EventFilter::topics(vec![EventTopic::ChainHead]));
        bus.publish(ChainEvent::ChainHead(BlockHeader::default()));
        assert!(matches!(sub.recv().await, Ok(ChainEvent::ChainHead(_))));
    }
}
