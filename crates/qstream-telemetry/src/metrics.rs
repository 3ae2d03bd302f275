//! Prometheus metrics for the qstream quote client.
//!
//! Covers:
//! - Connection and session state
//! - Reconnects and auth outcomes
//! - Inbound frames by event, and rejected frames
//! - Price updates and their age on arrival
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A failure means duplicate metric
//! names, which is a startup bug. These panics only happen during static
//! initialization.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
    register_int_counter, register_int_gauge, CounterVec, Encoder, Gauge, GaugeVec,
    HistogramVec, IntCounter, IntGauge, TextEncoder,
};

/// Session state labels, in lifecycle order.
pub const SESSION_STATES: &[&str] = &[
    "disconnected",
    "connecting",
    "connected_unauthenticated",
    "authenticating",
    "subscribed",
    "failed",
];

/// WebSocket connection state (1 = connected, 0 = disconnected).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "qstream_ws_connected",
        "WebSocket connection state (1=connected)"
    )
    .unwrap()
});

/// Session state machine current state.
/// Labels: state (see `SESSION_STATES`)
pub static SESSION_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "qstream_session_state",
        "Session state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Total reconnection attempts.
pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "qstream_ws_reconnect_total",
        "Total WebSocket reconnection attempts",
        &["reason"]
    )
    .unwrap()
});

/// Auth outcomes.
/// Labels: outcome (accepted/rejected)
pub static AUTH_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "qstream_auth_total",
        "Auth handshake outcomes",
        &["outcome"]
    )
    .unwrap()
});

/// Inbound frames routed by event kind.
pub static FRAMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "qstream_frames_total",
        "Inbound frames dispatched, by event",
        &["event"]
    )
    .unwrap()
});

/// Inbound frames that could not be decoded.
pub static FRAMES_REJECTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "qstream_frames_rejected_total",
        "Inbound frames dropped as malformed or unknown"
    )
    .unwrap()
});

/// Request acks by kind and status.
pub static ACKS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "qstream_acks_total",
        "Request acknowledgements, by request kind and status",
        &["kind", "status"]
    )
    .unwrap()
});

/// Server error responses.
pub static SERVER_ERRORS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "qstream_server_errors_total",
        "Error responses sent by the server"
    )
    .unwrap()
});

/// Price updates received per pair.
pub static PRICE_UPDATES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "qstream_price_updates_total",
        "Price updates received",
        &["pair"]
    )
    .unwrap()
});

/// Age of a price update on arrival, from its creation time.
pub static UPDATE_AGE_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "qstream_update_age_ms",
        "Price update age on arrival in milliseconds",
        &["pair"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]
    )
    .unwrap()
});

/// Number of pairs in the desired subscription set.
pub static DESIRED_SUBSCRIPTIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "qstream_desired_subscriptions",
        "Pairs in the desired subscription set"
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Record WebSocket connected.
    pub fn ws_connected() {
        WS_CONNECTED.set(1.0);
    }

    /// Record WebSocket disconnected.
    pub fn ws_disconnected() {
        WS_CONNECTED.set(0.0);
    }

    /// Set the session state. Only the active state is 1.
    pub fn session_state_set(state: &str) {
        for s in SESSION_STATES {
            SESSION_STATE.with_label_values(&[s]).set(0.0);
        }
        SESSION_STATE.with_label_values(&[state]).set(1.0);
    }

    pub fn ws_reconnect(reason: &str) {
        WS_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn auth_outcome(accepted: bool) {
        let outcome = if accepted { "accepted" } else { "rejected" };
        AUTH_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn frame_dispatched(event: &str) {
        FRAMES_TOTAL.with_label_values(&[event]).inc();
    }

    pub fn frame_rejected() {
        FRAMES_REJECTED_TOTAL.inc();
    }

    pub fn ack(kind: &str, ok: bool) {
        let status = if ok { "ok" } else { "error" };
        ACKS_TOTAL.with_label_values(&[kind, status]).inc();
    }

    pub fn server_error() {
        SERVER_ERRORS_TOTAL.inc();
    }

    /// Record `count` price updates for `pair`.
    pub fn price_updates(pair: &str, count: usize) {
        PRICE_UPDATES_TOTAL
            .with_label_values(&[pair])
            .inc_by(count as f64);
    }

    /// Record the age of one update. Negative ages (clock skew) are clamped to 0.
    pub fn update_age(pair: &str, age_ms: f64) {
        UPDATE_AGE_MS
            .with_label_values(&[pair])
            .observe(age_ms.max(0.0));
    }

    pub fn desired_subscriptions(count: usize) {
        DESIRED_SUBSCRIPTIONS.set(count as i64);
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn gather_text() -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
