//! Prometheus metrics for the market-data pipeline.
//!
//! The backpressure discipline says every non-blocking send that would
//! block drops the value and counts the drop. The counters below are the
//! single place those drops become visible.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally: a registration
//! failure means duplicate metric names, which is a fatal configuration
//! error caught at static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_int_counter_vec, CounterVec, GaugeVec,
    IntCounterVec,
};

/// Raw frames dropped toward a slow transport subscriber.
/// Labels: venue
pub static WS_FRAMES_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "caesar_ws_frames_dropped_total",
        "Raw frames dropped toward slow transport subscribers",
        &["venue"]
    )
    .unwrap()
});

/// Outgoing messages dropped because the transport outbox was full.
pub static WS_OUTBOX_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "caesar_ws_outbox_dropped_total",
        "Outgoing messages dropped on a full transport outbox",
        &["venue"]
    )
    .unwrap()
});

/// Transport reconnection attempts.
pub static WS_RECONNECTS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "caesar_ws_reconnect_total",
        "Transport reconnection attempts",
        &["venue"]
    )
    .unwrap()
});

/// Transport circuit state (1 = open / unhealthy, 0 = closed / healthy).
pub static WS_CIRCUIT_OPEN: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "caesar_ws_circuit_open",
        "Transport circuit state (1=open)",
        &["venue"]
    )
    .unwrap()
});

/// Book updates dropped toward slow hub subscribers.
/// Labels: kind (filtered/unified)
pub static HUB_UPDATES_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "caesar_hub_updates_dropped_total",
        "Book updates dropped toward slow hub subscribers",
        &["kind"]
    )
    .unwrap()
});

/// Updates dropped on the writer's saturated staging buffer.
pub static WRITER_BUFFER_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "caesar_writer_buffer_dropped_total",
        "Updates dropped on the writer staging buffer",
        &["venue"]
    )
    .unwrap()
});

/// Arbitrage events dropped on a full events channel.
pub static ARB_EVENTS_DROPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "caesar_arb_events_dropped_total",
        "Arbitrage events dropped on a full events channel",
        &["pair"]
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    pub fn ws_frame_dropped(venue: &str) {
        WS_FRAMES_DROPPED.with_label_values(&[venue]).inc();
    }

    pub fn ws_outbox_dropped(venue: &str) {
        WS_OUTBOX_DROPPED.with_label_values(&[venue]).inc();
    }

    pub fn ws_reconnect(venue: &str) {
        WS_RECONNECTS.with_label_values(&[venue]).inc();
    }

    pub fn ws_circuit(venue: &str, open: bool) {
        WS_CIRCUIT_OPEN
            .with_label_values(&[venue])
            .set(if open { 1.0 } else { 0.0 });
    }

    pub fn hub_update_dropped(kind: &str) {
        HUB_UPDATES_DROPPED.with_label_values(&[kind]).inc();
    }

    pub fn writer_buffer_dropped(venue: &str) {
        WRITER_BUFFER_DROPPED.with_label_values(&[venue]).inc();
    }

    pub fn arb_event_dropped(pair: &str) {
        ARB_EVENTS_DROPPED.with_label_values(&[pair]).inc();
    }
}
