//! Error types for JWKS key resolution.
//!
//! Every failure is scoped to a single `get` call. The bucket and cache keep
//! working for subsequent calls regardless of which variant was returned.

use std::time::Duration;
use thiserror::Error;

/// Errors returned by key providers and their configuration.
///
/// The type is `Clone` because a single in-flight fetch result is handed to
/// every caller coalesced onto it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwksError {
    /// Invalid bucket, cache or key source configuration, or a token count
    /// outside `[1, capacity]`. Never retried.
    #[error("Configuration error: {0}")]
    InvalidConfiguration(String),

    /// The token bucket had no capacity for this attempt.
    #[error("The rate limit has been reached, please wait {} milliseconds", .retry_after.as_millis())]
    RateLimited {
        /// Advisory wait before the next attempt can be admitted.
        retry_after: Duration,
    },

    /// The key source has no record for the requested id.
    #[error("Signing key not found: {0}")]
    KeyNotFound(String),

    /// The key source's transport or parsing layer failed.
    #[error("JWKS fetch failed: {0}")]
    FetchFailed(String),

    /// A key record's material could not be turned into a verification key.
    #[error("Invalid public key: {0}")]
    InvalidKey(String),
}

impl JwksError {
    /// Advisory backoff carried by a rate-limit rejection.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            JwksError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// Whether the same call may succeed if repeated later.
    ///
    /// Configuration and key-material errors are permanent; everything the
    /// remote side or the limiter produced is worth retrying by the caller.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            JwksError::RateLimited { .. }
            | JwksError::FetchFailed(_)
            | JwksError::KeyNotFound(_) => true,
            JwksError::InvalidConfiguration(_) | JwksError::InvalidKey(_) => false,
        }
    }

    /// Bounded label used for metrics.
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            JwksError::InvalidConfiguration(_) => "invalid_configuration",
            JwksError::RateLimited { .. } => "rate_limited",
            JwksError::KeyNotFound(_) => "key_not_found",
            JwksError::FetchFailed(_) => "fetch_failed",
            JwksError::InvalidKey(_) => "invalid_key",
        }
    }
}

/// Result type alias using `JwksError`
pub type Result<T> = std::result::Result<T, JwksError>;
