//! Key provider that limits how often the wrapped provider is called.
//!
//! Every call spends one token before delegating, including calls whose
//! fetch later fails or finds no matching key. The limiter bounds attempts,
//! not successes.

use crate::bucket::TokenBucket;
use crate::error::{JwksError, Result};
use crate::jwk::Jwk;
use crate::observability::metrics::record_rate_limit_decision;
use crate::provider::KeyProvider;
use std::sync::Arc;
use tracing::{instrument, warn};

/// Rate-limiting decorator around another [`KeyProvider`].
#[derive(Debug)]
pub struct RateLimitedKeyProvider {
    inner: Arc<dyn KeyProvider>,
    bucket: Arc<TokenBucket>,
}

impl RateLimitedKeyProvider {
    /// Wrap `inner`, admitting calls only while `bucket` has tokens.
    ///
    /// The bucket is taken as an `Arc` so one rate-limit domain can be shared
    /// between providers.
    #[must_use]
    pub fn new(inner: Arc<dyn KeyProvider>, bucket: Arc<TokenBucket>) -> Self {
        Self { inner, bucket }
    }

    /// The wrapped provider.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn KeyProvider> {
        &self.inner
    }

    /// The bucket consulted on each call.
    #[must_use]
    pub fn bucket(&self) -> &Arc<TokenBucket> {
        &self.bucket
    }
}

#[async_trait::async_trait]
impl KeyProvider for RateLimitedKeyProvider {
    /// # Errors
    ///
    /// Returns `JwksError::RateLimited` with the advisory wait when the
    /// bucket is empty; otherwise whatever the wrapped provider returns.
    #[instrument(skip(self), fields(kid = %kid))]
    async fn get(&self, kid: &str) -> Result<Jwk> {
        let decision = self.bucket.try_acquire(1)?;
        record_rate_limit_decision(decision.is_ok());

        if let Err(retry_after) = decision {
            warn!(
                target: "jwks.rate_limited",
                kid = %kid,
                retry_after_ms = u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX),
                "Rate limit reached, rejecting key fetch"
            );
            return Err(JwksError::RateLimited { retry_after });
        }

        self.inner.get(kid).await
    }
}
