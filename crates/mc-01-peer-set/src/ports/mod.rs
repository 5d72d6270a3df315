//! # Ports Layer
//!
//! The peer set consumes one port: [`PeerConnection`], the write half of a
//! connection. Reads are driven by the protocol handler.

pub mod outbound;

pub use outbound::{ConnectionError, PeerConnection};
