//! JWKS signing key provider.
//!
//! Resolves JSON Web Keys by key id from a remote JWKS document, with
//! optional rate limiting of remote fetches and an in-memory cache in front.
//!
//! # Modules
//!
//! - `bucket` - Token bucket rate limiter
//! - `builder` - Pipeline composition
//! - `cached` - Caching provider with per-key single-flight
//! - `config` - Environment configuration
//! - `error` - Error types
//! - `jwk` - JWK records
//! - `observability` - Log targets and metrics
//! - `provider` - The `KeyProvider` contract
//! - `rate_limited` - Rate-limited provider
//! - `url_source` - HTTP key source

#![warn(clippy::pedantic)]

pub mod bucket;
pub mod builder;
pub mod cached;
pub mod config;
pub mod error;
pub mod jwk;
pub mod observability;
pub mod provider;
pub mod rate_limited;
pub mod url_source;

pub use bucket::TokenBucket;
pub use builder::KeyProviderBuilder;
pub use cached::CachedKeyProvider;
pub use config::{ConfigError, KeyLocation, ProviderConfig};
pub use error::{JwksError, Result};
pub use jwk::{Jwk, JwkSet};
pub use provider::KeyProvider;
pub use rate_limited::RateLimitedKeyProvider;
pub use url_source::{HttpTimeouts, UrlKeySource};
