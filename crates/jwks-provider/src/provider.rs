//! The single capability every pipeline stage implements.

use crate::error::Result;
use crate::jwk::Jwk;
use std::fmt::Debug;
use std::sync::Arc;

/// Resolves a signing key by key id.
///
/// Implemented by the raw key source and by each decorator that wraps it
/// (rate limiting, caching). `Debug` output of a decorator shows the
/// provider it wraps, so a composed chain can be inspected.
#[async_trait::async_trait]
pub trait KeyProvider: Debug + Send + Sync {
    /// Return the key whose `kid` matches.
    ///
    /// # Errors
    ///
    /// Any `JwksError`; see the implementing provider for which variants it
    /// produces.
    async fn get(&self, kid: &str) -> Result<Jwk>;
}

#[async_trait::async_trait]
impl<T: KeyProvider + ?Sized> KeyProvider for Arc<T> {
    async fn get(&self, kid: &str) -> Result<Jwk> {
        (**self).get(kid).await
    }
}
