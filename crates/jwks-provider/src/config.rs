//! Key provider configuration.
//!
//! Configuration is loaded from environment variables. Either `JWKS_URL` or
//! `JWKS_DOMAIN` must be set; everything else has a default matching the
//! pipeline builder's.

use crate::bucket::{DEFAULT_BUCKET_CAPACITY, DEFAULT_REFILL_INTERVAL};
use crate::builder::KeyProviderBuilder;
use crate::cached::{DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL};
use crate::error::Result;
use crate::url_source::HttpTimeouts;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Where the key set is fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyLocation {
    /// Full JWKS document URL.
    Url(String),
    /// Domain serving `/.well-known/jwks.json`.
    Domain(String),
}

/// Key provider configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Where keys are loaded from.
    pub location: KeyLocation,

    /// Whether the cache layer is enabled (default: true).
    pub cache_enabled: bool,

    /// Maximum number of cached keys (default: 5).
    pub cache_size: usize,

    /// How long a cached key stays valid (default: 10 hours).
    pub cache_ttl: Duration,

    /// Whether the rate-limit layer is enabled (default: true).
    pub rate_limit_enabled: bool,

    /// Token bucket capacity (default: 10).
    pub bucket_size: u64,

    /// Time to regenerate one token (default: 60 seconds).
    pub refill_interval: Duration,

    /// Per-request HTTP timeout.
    pub request_timeout: Option<Duration>,

    /// HTTP connect timeout.
    pub connect_timeout: Option<Duration>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl ProviderConfig {
    /// Configuration for `location` with every other value defaulted.
    #[must_use]
    pub fn new(location: KeyLocation) -> Self {
        Self {
            location,
            cache_enabled: true,
            cache_size: DEFAULT_CACHE_CAPACITY,
            cache_ttl: DEFAULT_CACHE_TTL,
            rate_limit_enabled: true,
            bucket_size: DEFAULT_BUCKET_CAPACITY,
            refill_interval: DEFAULT_REFILL_INTERVAL,
            request_timeout: None,
            connect_timeout: None,
        }
    }

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if no key location is set or a value fails to
    /// parse.
    pub fn from_env() -> std::result::Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if no key location is set or a value fails to
    /// parse.
    pub fn from_vars(vars: &HashMap<String, String>) -> std::result::Result<Self, ConfigError> {
        let location = match (vars.get("JWKS_URL"), vars.get("JWKS_DOMAIN")) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::InvalidValue(
                    "JWKS_URL and JWKS_DOMAIN are mutually exclusive".to_string(),
                ))
            }
            (Some(url), None) => KeyLocation::Url(url.clone()),
            (None, Some(domain)) => KeyLocation::Domain(domain.clone()),
            (None, None) => return Err(ConfigError::MissingEnvVar("JWKS_URL".to_string())),
        };

        let mut config = Self::new(location);

        if let Some(enabled) = parse_var::<bool>(vars, "JWKS_CACHE_ENABLED")? {
            config.cache_enabled = enabled;
        }
        if let Some(size) = parse_positive::<usize>(vars, "JWKS_CACHE_SIZE")? {
            config.cache_size = size;
        }
        if let Some(secs) = parse_positive::<u64>(vars, "JWKS_CACHE_TTL_SECONDS")? {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(enabled) = parse_var::<bool>(vars, "JWKS_RATE_LIMIT_ENABLED")? {
            config.rate_limit_enabled = enabled;
        }
        if let Some(size) = parse_positive::<u64>(vars, "JWKS_RATE_LIMIT_BUCKET_SIZE")? {
            config.bucket_size = size;
        }
        if let Some(secs) = parse_positive::<u64>(vars, "JWKS_RATE_LIMIT_REFILL_SECONDS")? {
            config.refill_interval = Duration::from_secs(secs);
        }
        config.request_timeout =
            parse_positive::<u64>(vars, "JWKS_HTTP_TIMEOUT_MS")?.map(Duration::from_millis);
        config.connect_timeout =
            parse_positive::<u64>(vars, "JWKS_CONNECT_TIMEOUT_MS")?.map(Duration::from_millis);

        Ok(config)
    }

    /// Set the cache layer parameters, enabling it.
    #[must_use]
    pub fn with_cache(mut self, size: usize, ttl: Duration) -> Self {
        self.cache_enabled = true;
        self.cache_size = size;
        self.cache_ttl = ttl;
        self
    }

    /// Set the rate-limit layer parameters, enabling it.
    #[must_use]
    pub fn with_rate_limit(mut self, bucket_size: u64, refill_interval: Duration) -> Self {
        self.rate_limit_enabled = true;
        self.bucket_size = bucket_size;
        self.refill_interval = refill_interval;
        self
    }

    /// Set the HTTP timeouts.
    #[must_use]
    pub fn with_timeouts(mut self, request: Option<Duration>, connect: Option<Duration>) -> Self {
        self.request_timeout = request;
        self.connect_timeout = connect;
        self
    }

    /// Map the configuration onto a pipeline builder.
    ///
    /// # Errors
    ///
    /// Returns `JwksError::InvalidConfiguration` if the key location is
    /// invalid.
    pub fn into_builder(self) -> Result<KeyProviderBuilder> {
        let builder = match &self.location {
            KeyLocation::Url(url) => KeyProviderBuilder::new(url)?,
            KeyLocation::Domain(domain) => KeyProviderBuilder::for_domain(domain)?,
        };

        Ok(builder
            .cache(self.cache_size, self.cache_ttl)
            .cached(self.cache_enabled)
            .rate_limit(self.bucket_size, self.refill_interval)
            .rate_limited(self.rate_limit_enabled)
            .with_http_timeouts(HttpTimeouts {
                connect: self.connect_timeout,
                request: self.request_timeout,
            }))
    }
}

fn parse_var<T>(
    vars: &HashMap<String, String>,
    name: &str,
) -> std::result::Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    vars.get(name)
        .map(|value_str| {
            value_str.trim().parse().map_err(|e| {
                ConfigError::InvalidValue(format!(
                    "{name} must be a valid value, got '{value_str}': {e}"
                ))
            })
        })
        .transpose()
}

fn parse_positive<T>(
    vars: &HashMap<String, String>,
    name: &str,
) -> std::result::Result<Option<T>, ConfigError>
where
    T: FromStr + Default + PartialEq,
    T::Err: std::fmt::Display,
{
    match parse_var::<T>(vars, name)? {
        Some(value) if value == T::default() => Err(ConfigError::InvalidValue(format!(
            "{name} must be greater than 0"
        ))),
        other => Ok(other),
    }
}
