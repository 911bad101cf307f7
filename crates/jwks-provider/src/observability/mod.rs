//! Observability for the key provider pipeline.
//!
//! Logging goes through `tracing` with one target per component:
//!
//! | Target | Component |
//! |--------|-----------|
//! | `jwks.bucket` | token bucket arithmetic (trace only) |
//! | `jwks.rate_limited` | rate-limit decisions |
//! | `jwks.cache` | cache hits, misses, evictions, single-flight |
//! | `jwks.source` | HTTP fetches |
//! | `jwks.builder` | pipeline construction |
//!
//! Metrics go through the `metrics` facade, see [`metrics`].

pub mod metrics;

pub use self::metrics::{
    record_cache_lookup, record_fetch, record_fetch_coalesced, record_rate_limit_decision,
    set_cache_entries,
};
