//! Prometheus metrics for the surebet placer.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A registration failure means a
//! duplicate metric name, which is a programming error caught at first use
//! during startup.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_int_counter, register_int_gauge, CounterVec, Encoder,
    IntCounter, IntGauge, TextEncoder,
};

/// Signals received from the bus.
pub static SIGNALS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("surebet_signals_total", "Total surebet signals received").unwrap()
});

/// Signals rejected by the evaluator.
/// Labels: reason (no_market/stale/lock_timeout/blank_quote/profit/min_volume/place_error)
pub static REJECTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "surebet_rejections_total",
        "Total signals rejected by the evaluator",
        &["reason"]
    )
    .unwrap()
});

/// Hedge orders accepted by the venue.
pub static HEDGES_PLACED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "surebet_hedges_placed_total",
        "Total hedge orders accepted by the venue",
        &["side"]
    )
    .unwrap()
});

/// Heal placement attempts.
/// Labels: result (ok/error)
pub static HEAL_ATTEMPTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "surebet_heal_attempts_total",
        "Total heal placement attempts",
        &["result"]
    )
    .unwrap()
});

/// Heal records reaching a final status.
/// Labels: status (completed/abandoned/unresolved)
pub static HEAL_OUTCOMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "surebet_heal_outcomes_total",
        "Total heal records reaching a final status",
        &["status"]
    )
    .unwrap()
});

/// Symbol lock acquisitions that timed out.
pub static LOCK_TIMEOUTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "surebet_lock_timeouts_total",
        "Total symbol lock acquisitions that timed out"
    )
    .unwrap()
});

/// Symbol locks currently held.
pub static LOCKS_HELD: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("surebet_locks_held", "Symbol locks currently held").unwrap()
});

/// Open orders on the venue as seen by the tracker.
pub static OPEN_ORDERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("surebet_open_orders", "Open orders tracked").unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    pub fn signal_received() {
        SIGNALS_TOTAL.inc();
    }

    /// Record an evaluator rejection.
    pub fn rejected(reason: &str) {
        REJECTIONS_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn hedge_placed(side: &str) {
        HEDGES_PLACED_TOTAL.with_label_values(&[side]).inc();
    }

    /// Record a heal placement attempt.
    pub fn heal_attempt(ok: bool) {
        let result = if ok { "ok" } else { "error" };
        HEAL_ATTEMPTS_TOTAL.with_label_values(&[result]).inc();
    }

    pub fn heal_outcome(status: &str) {
        HEAL_OUTCOMES_TOTAL.with_label_values(&[status]).inc();
    }

    pub fn lock_timeout() {
        LOCK_TIMEOUTS_TOTAL.inc();
    }

    pub fn locks_held_set(count: i64) {
        LOCKS_HELD.set(count);
    }

    pub fn open_orders_set(count: i64) {
        OPEN_ORDERS.set(count);
    }

    /// Render the default registry in text exposition format.
    pub fn render() -> TelemetryResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
