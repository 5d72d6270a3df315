//! # Downloader Metrics
//!
//! Enable with the `metrics` feature:
//! ```toml
//! mc-05-downloader = { path = "...", features = ["metrics"] }
//! ```
//!
//! ## Metrics Exported
//!
//! - `downloader_items_in_total{kind}` - items accepted, by kind
//! - `downloader_requests_total{kind}` - requests sent, by kind
//! - `downloader_items_dropped_total{kind}` - items rejected as invalid
//! - `downloader_timeouts_total{kind}` - requests that failed without data
//! - `downloader_throttle_total` - state workers that found nothing to fetch

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

#[cfg(feature = "metrics")]
lazy_static! {
    pub static ref ITEMS_IN: IntCounterVec = register_int_counter_vec!(
        "downloader_items_in_total",
        "Headers, bodies, receipts and state nodes accepted",
        &["kind"]
    )
    .expect("Failed to create ITEMS_IN metric");

    pub static ref REQUESTS: IntCounterVec = register_int_counter_vec!(
        "downloader_requests_total",
        "Download requests sent",
        &["kind"]
    )
    .expect("Failed to create REQUESTS metric");

    pub static ref ITEMS_DROPPED: IntCounterVec = register_int_counter_vec!(
        "downloader_items_dropped_total",
        "Delivered items rejected as invalid",
        &["kind"]
    )
    .expect("Failed to create ITEMS_DROPPED metric");

    pub static ref TIMEOUTS: IntCounterVec = register_int_counter_vec!(
        "downloader_timeouts_total",
        "Download requests that failed without data",
        &["kind"]
    )
    .expect("Failed to create TIMEOUTS metric");

    pub static ref THROTTLE: IntCounter = register_int_counter!(
        "downloader_throttle_total",
        "State workers idled while other requests were in flight"
    )
    .expect("Failed to create THROTTLE metric");
}

#[cfg(feature = "metrics")]
pub fn record_in(kind: &str, count: usize) {
    ITEMS_IN.with_label_values(&[kind]).inc_by(count as u64);
}

#[cfg(feature = "metrics")]
pub fn record_request(kind: &str) {
    REQUESTS.with_label_values(&[kind]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_dropped(kind: &str, count: usize) {
    ITEMS_DROPPED.with_label_values(&[kind]).inc_by(count as u64);
}

#[cfg(feature = "metrics")]
pub fn record_timeout(kind: &str) {
    TIMEOUTS.with_label_values(&[kind]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_throttle() {
    THROTTLE.inc();
}

#[cfg(not(feature = "metrics"))]
pub fn record_in(_kind: &str, _count: usize) {}

#[cfg(not(feature = "metrics"))]
pub fn record_request(_kind: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_dropped(_kind: &str, _count: usize) {}

#[cfg(not(feature = "metrics"))]
pub fn record_timeout(_kind: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_throttle() {}
