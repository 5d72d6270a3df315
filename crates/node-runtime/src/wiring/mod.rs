//! # Wiring
//!
//! Long-running tasks that connect the components to the network and to
//! the metrics registry.

pub mod metrics;
pub mod network;

pub use metrics::MetricsRecorder;
pub use network::{run_dialer, run_listener};
