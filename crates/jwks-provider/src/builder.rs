//! Builder composing the key provider pipeline.
//!
//! ```text
//! UrlKeySource -> RateLimitedKeyProvider (optional) -> CachedKeyProvider (optional)
//! ```
//!
//! The composition order is fixed: the cache always sits outside the rate
//! limiter, so cache hits never spend tokens. Both layers are enabled by
//! default.
//!
//! # Example
//!
//! ```rust,ignore
//! use jwks_provider::builder::KeyProviderBuilder;
//! use std::time::Duration;
//!
//! let provider = KeyProviderBuilder::for_domain("samples.example.com")?
//!     .cache(10, Duration::from_secs(3600))
//!     .rate_limit(5, Duration::from_secs(30))
//!     .build()?;
//!
//! let jwk = provider.get("key-id").await?;
//! ```

use crate::bucket::{TokenBucket, DEFAULT_BUCKET_CAPACITY, DEFAULT_REFILL_INTERVAL};
use crate::cached::{CachedKeyProvider, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL};
use crate::error::Result;
use crate::provider::KeyProvider;
use crate::rate_limited::RateLimitedKeyProvider;
use crate::url_source::{parse_jwks_url, url_for_domain, HttpTimeouts, UrlKeySource};
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Where the limiter's bucket comes from.
#[derive(Debug, Clone)]
enum BucketSpec {
    Params {
        capacity: u64,
        refill_interval: Duration,
    },
    Shared(Arc<TokenBucket>),
}

/// Builder for a [`KeyProvider`] pipeline.
#[derive(Debug, Clone)]
#[must_use]
pub struct KeyProviderBuilder {
    url: Url,
    timeouts: HttpTimeouts,
    cached: bool,
    cache_capacity: usize,
    cache_ttl: Duration,
    rate_limited: bool,
    bucket: BucketSpec,
}

impl KeyProviderBuilder {
    /// Start from a full JWKS URL.
    ///
    /// # Errors
    ///
    /// Returns `JwksError::InvalidConfiguration` if the URL is empty,
    /// unparsable or not HTTP(S).
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self::from_url(parse_jwks_url(url)?))
    }

    /// Start from a domain; keys are loaded from its well-known JWKS path.
    ///
    /// # Errors
    ///
    /// Returns `JwksError::InvalidConfiguration` if the domain is empty or
    /// invalid.
    pub fn for_domain(domain: &str) -> Result<Self> {
        Ok(Self::from_url(url_for_domain(domain)?))
    }

    /// Start from an already parsed URL.
    pub fn from_url(url: Url) -> Self {
        Self {
            url,
            timeouts: HttpTimeouts::default(),
            cached: true,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_ttl: DEFAULT_CACHE_TTL,
            rate_limited: true,
            bucket: BucketSpec::Params {
                capacity: DEFAULT_BUCKET_CAPACITY,
                refill_interval: DEFAULT_REFILL_INTERVAL,
            },
        }
    }

    /// Toggle the cache layer.
    pub fn cached(mut self, enabled: bool) -> Self {
        self.cached = enabled;
        self
    }

    /// Enable the cache layer with an explicit size and TTL.
    pub fn cache(mut self, capacity: usize, ttl: Duration) -> Self {
        self.cached = true;
        self.cache_capacity = capacity;
        self.cache_ttl = ttl;
        self
    }

    /// Toggle the rate-limit layer.
    pub fn rate_limited(mut self, enabled: bool) -> Self {
        self.rate_limited = enabled;
        self
    }

    /// Enable the rate-limit layer with a new bucket of `capacity` tokens,
    /// one token regenerated every `refill_interval`.
    pub fn rate_limit(mut self, capacity: u64, refill_interval: Duration) -> Self {
        self.rate_limited = true;
        self.bucket = BucketSpec::Params {
            capacity,
            refill_interval,
        };
        self
    }

    /// Enable the rate-limit layer drawing from an existing bucket, so
    /// several pipelines share one rate-limit domain.
    pub fn shared_bucket(mut self, bucket: Arc<TokenBucket>) -> Self {
        self.rate_limited = true;
        self.bucket = BucketSpec::Shared(bucket);
        self
    }

    /// Set HTTP timeouts for the key source.
    pub fn with_http_timeouts(mut self, timeouts: HttpTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// URL keys are loaded from.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Build the pipeline on top of an HTTP key source for the configured
    /// URL.
    ///
    /// # Errors
    ///
    /// Returns `JwksError::InvalidConfiguration` if any layer's parameters
    /// are invalid.
    pub fn build(self) -> Result<Arc<dyn KeyProvider>> {
        let source = UrlKeySource::with_timeouts(self.url.clone(), self.timeouts)?;
        self.build_with_source(Arc::new(source))
    }

    /// Build the pipeline on top of a caller-supplied key source.
    ///
    /// The configured URL and timeouts are ignored.
    ///
    /// # Errors
    ///
    /// Returns `JwksError::InvalidConfiguration` if any layer's parameters
    /// are invalid.
    pub fn build_with_source(self, source: Arc<dyn KeyProvider>) -> Result<Arc<dyn KeyProvider>> {
        let mut provider = source;

        if self.rate_limited {
            let bucket = match self.bucket {
                BucketSpec::Params {
                    capacity,
                    refill_interval,
                } => Arc::new(TokenBucket::new(capacity, refill_interval)?),
                BucketSpec::Shared(bucket) => bucket,
            };
            provider = Arc::new(RateLimitedKeyProvider::new(provider, bucket));
        }

        if self.cached {
            provider = Arc::new(CachedKeyProvider::with_limits(
                provider,
                self.cache_capacity,
                self.cache_ttl,
            )?);
        }

        info!(
            target: "jwks.builder",
            url = %self.url,
            cached = self.cached,
            rate_limited = self.rate_limited,
            "Key provider pipeline built"
        );

        Ok(provider)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::JwksError;
    use crate::jwk::Jwk;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl KeyProvider for CountingSource {
        async fn get(&self, kid: &str) -> Result<Jwk> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(serde_json::from_value(serde_json::json!({"kid": kid, "kty": "OKP"})).unwrap())
        }
    }

    fn builder() -> KeyProviderBuilder {
        KeyProviderBuilder::for_domain("samples.example.com").unwrap()
    }

    #[test]
    fn test_missing_location_fails_fast() {
        assert!(matches!(
            KeyProviderBuilder::new(""),
            Err(JwksError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            KeyProviderBuilder::for_domain(""),
            Err(JwksError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_domain_resolves_well_known_url() {
        assert_eq!(
            builder().url().as_str(),
            "https://samples.example.com/.well-known/jwks.json"
        );
    }

    #[test]
    fn test_default_pipeline_is_cached_and_rate_limited() {
        let provider = builder().build().unwrap();
        let debug_str = format!("{provider:?}");

        let cached = debug_str.find("CachedKeyProvider").unwrap();
        let limited = debug_str.find("RateLimitedKeyProvider").unwrap();
        let source = debug_str.find("UrlKeySource").unwrap();
        assert!(cached < limited && limited < source, "{debug_str}");
        assert!(debug_str.contains("capacity: 5"));
        assert!(debug_str.contains("capacity: 10"));
    }

    #[test]
    fn test_order_is_fixed_regardless_of_call_order() {
        let provider = builder()
            .cached(false)
            .rate_limited(false)
            .rate_limit(3, Duration::from_secs(1))
            .cache(7, Duration::from_secs(60))
            .build()
            .unwrap();
        let debug_str = format!("{provider:?}");

        let cached = debug_str.find("CachedKeyProvider").unwrap();
        let limited = debug_str.find("RateLimitedKeyProvider").unwrap();
        assert!(cached < limited, "{debug_str}");
        assert!(debug_str.contains("capacity: 7"));
        assert!(debug_str.contains("capacity: 3"));
    }

    #[test]
    fn test_disabling_layers() {
        let provider = builder().cached(false).build().unwrap();
        let debug_str = format!("{provider:?}");
        assert!(debug_str.starts_with("RateLimitedKeyProvider"));
        assert!(!debug_str.contains("CachedKeyProvider"));

        let provider = builder().rate_limited(false).build().unwrap();
        let debug_str = format!("{provider:?}");
        assert!(debug_str.starts_with("CachedKeyProvider"));
        assert!(!debug_str.contains("RateLimitedKeyProvider"));

        let provider = builder().cached(false).rate_limited(false).build().unwrap();
        assert!(format!("{provider:?}").starts_with("UrlKeySource"));
    }

    #[test]
    fn test_invalid_layer_parameters_fail_at_build() {
        assert!(matches!(
            builder().rate_limit(0, Duration::from_secs(1)).build(),
            Err(JwksError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            builder().rate_limit(1, Duration::ZERO).build(),
            Err(JwksError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            builder().cache(0, Duration::from_secs(1)).build(),
            Err(JwksError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_disabled_layer_parameters_are_not_validated() {
        let result = builder()
            .rate_limit(0, Duration::from_secs(1))
            .rate_limited(false)
            .build();
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_layers_maps_calls_one_to_one() {
        let source = Arc::new(CountingSource::default());
        let provider = builder()
            .cached(false)
            .rate_limited(false)
            .build_with_source(source.clone())
            .unwrap();

        for _ in 0..25 {
            provider.get("kid-1").await.unwrap();
        }
        assert_eq!(source.calls.load(Ordering::SeqCst), 25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hits_do_not_spend_tokens() {
        let source = Arc::new(CountingSource::default());
        let provider = builder()
            .rate_limit(1, Duration::from_secs(60))
            .build_with_source(source.clone())
            .unwrap();

        provider.get("kid-1").await.unwrap();
        provider.get("kid-1").await.unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);

        // The single token is gone; a new kid is limited
        assert!(matches!(
            provider.get("kid-2").await,
            Err(JwksError::RateLimited { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_bucket_across_pipelines() {
        let bucket = Arc::new(TokenBucket::new(1, Duration::from_secs(60)).unwrap());
        let first = builder()
            .shared_bucket(bucket.clone())
            .build_with_source(Arc::new(CountingSource::default()))
            .unwrap();
        let second = builder()
            .shared_bucket(bucket)
            .build_with_source(Arc::new(CountingSource::default()))
            .unwrap();

        first.get("kid-1").await.unwrap();
        assert!(matches!(
            second.get("kid-1").await,
            Err(JwksError::RateLimited { .. })
        ));
    }
}
