//! Metrics definitions for the key provider pipeline.
//!
//! All metrics follow Prometheus naming conventions:
//! - `jwks_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `result`: 3 values (hit, miss, expired)
//! - `decision`: 2 values (allowed, rejected)
//! - `status`: 2 values (success, error)
//! - `error_type`: bounded by `JwksError` variants
//!
//! Key ids are never used as labels.
//!
//! No recorder is installed here. Without one, the `metrics` facade
//! discards everything.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a cache lookup outcome.
///
/// Metric: `jwks_cache_lookups_total`
/// Labels: `result` (hit, miss, expired)
pub fn record_cache_lookup(result: &'static str) {
    counter!("jwks_cache_lookups_total", "result" => result).increment(1);
}

/// Set the current number of cached entries.
///
/// Metric: `jwks_cache_entries`
#[allow(clippy::cast_precision_loss)]
pub fn set_cache_entries(count: usize) {
    gauge!("jwks_cache_entries").set(count as f64);
}

/// Record a cache miss that attached to an already running fetch.
///
/// Metric: `jwks_fetch_coalesced_total`
pub fn record_fetch_coalesced() {
    counter!("jwks_fetch_coalesced_total").increment(1);
}

/// Record a token bucket decision.
///
/// Metric: `jwks_rate_limit_decisions_total`
/// Labels: `decision` (allowed, rejected)
pub fn record_rate_limit_decision(allowed: bool) {
    let decision = if allowed { "allowed" } else { "rejected" };
    counter!("jwks_rate_limit_decisions_total", "decision" => decision).increment(1);
}

/// Record a JWKS fetch against the remote source.
///
/// Metrics: `jwks_fetches_total`, `jwks_fetch_duration_seconds`
/// Labels: `status`, `error_type`
pub fn record_fetch(status: &'static str, error_type: Option<&'static str>, duration: Duration) {
    histogram!("jwks_fetch_duration_seconds", "status" => status).record(duration.as_secs_f64());

    counter!("jwks_fetches_total",
        "status" => status,
        "error_type" => error_type.unwrap_or("none")
    )
    .increment(1);
}
