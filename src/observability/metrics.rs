//! Metrics collection.
//!
//! # Metrics
//! - `remote_breaker_transitions_total` (counter): state changes by target, from, to
//! - `remote_breaker_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `remote_calls_total` (counter): finished calls by target, outcome
//! - `remote_call_duration_seconds` (histogram): end-to-end call latency
//!
//! # Design Decisions
//! - Emitted through the `metrics` facade; without an installed recorder they are no-ops
//! - The library never installs an exporter

use std::time::Instant;

use crate::resilience::CircuitState;

pub fn record_breaker_transition(name: &str, from: CircuitState, to: CircuitState) {
    ::metrics::counter!(
        "remote_breaker_transitions_total",
        "target" => name.to_string(),
        "from" => from.as_str(),
        "to" => to.as_str()
    )
    .increment(1);
    ::metrics::gauge!("remote_breaker_state", "target" => name.to_string()).set(f64::from(to as u8));
}

pub fn record_call(target: &str, outcome: &'static str, start: Instant) {
    ::metrics::counter!(
        "remote_calls_total",
        "target" => target.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    ::metrics::histogram!("remote_call_duration_seconds", "target" => target.to_string())
        .record(start.elapsed().as_secs_f64());
}
