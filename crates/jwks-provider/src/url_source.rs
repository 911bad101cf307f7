//! JWKS key source backed by an HTTP endpoint.
//!
//! Fetches the full JWKS document on every call and selects the key by id.
//! It keeps no state between calls; caching and rate limiting are layered on
//! top by [`crate::builder::KeyProviderBuilder`].
//!
//! # Security
//!
//! - HTTPS is assumed when a bare domain is given
//! - HTTP timeouts prevent hanging connections
//! - Key material is never logged

use crate::error::{JwksError, Result};
use crate::jwk::{Jwk, JwkSet};
use crate::observability::metrics::record_fetch;
use crate::provider::KeyProvider;
use reqwest::Url;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

/// Well-known path of the JWKS document below a domain.
pub const WELL_KNOWN_JWKS_PATH: &str = "/.well-known/jwks.json";

/// HTTP timeouts for the key source. `None` keeps the client default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HttpTimeouts {
    /// Connection establishment timeout.
    pub connect: Option<Duration>,

    /// Whole-request timeout, including reading the body.
    pub request: Option<Duration>,
}

/// Key source that loads keys from a JWKS URL.
pub struct UrlKeySource {
    url: Url,
    http_client: reqwest::Client,
}

impl fmt::Debug for UrlKeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UrlKeySource")
            .field("url", &self.url.as_str())
            .finish_non_exhaustive()
    }
}

impl UrlKeySource {
    /// Create a key source for a full JWKS URL with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns `JwksError::InvalidConfiguration` if the URL is not HTTP(S) or
    /// the HTTP client cannot be built.
    pub fn new(url: Url) -> Result<Self> {
        Self::with_timeouts(url, HttpTimeouts::default())
    }

    /// Create a key source with explicit HTTP timeouts.
    ///
    /// # Errors
    ///
    /// Returns `JwksError::InvalidConfiguration` if the URL is not HTTP(S),
    /// a timeout is zero, or the HTTP client cannot be built.
    pub fn with_timeouts(url: Url, timeouts: HttpTimeouts) -> Result<Self> {
        check_scheme(&url)?;

        let mut builder = reqwest::Client::builder();
        if let Some(connect) = timeouts.connect {
            if connect.is_zero() {
                return Err(JwksError::InvalidConfiguration(
                    "Invalid connect timeout value '0'. Must be positive.".to_string(),
                ));
            }
            builder = builder.connect_timeout(connect);
        }
        if let Some(request) = timeouts.request {
            if request.is_zero() {
                return Err(JwksError::InvalidConfiguration(
                    "Invalid request timeout value '0'. Must be positive.".to_string(),
                ));
            }
            builder = builder.timeout(request);
        }

        let http_client = builder.build().map_err(|e| {
            JwksError::InvalidConfiguration(format!("Failed to build HTTP client: {e}"))
        })?;

        Ok(Self { url, http_client })
    }

    /// Create a key source for a domain's well-known JWKS document.
    ///
    /// # Errors
    ///
    /// See [`url_for_domain`] and [`UrlKeySource::new`].
    pub fn for_domain(domain: &str) -> Result<Self> {
        Self::new(url_for_domain(domain)?)
    }

    /// URL the JWKS document is loaded from.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Fetch every key published in the JWKS document.
    ///
    /// # Errors
    ///
    /// - `JwksError::FetchFailed` on transport errors, non-success status or
    ///   a malformed document
    /// - `JwksError::KeyNotFound` if the document contains no keys
    #[instrument(skip(self), fields(url = %self.url))]
    pub async fn fetch_all(&self) -> Result<Vec<Jwk>> {
        let start = Instant::now();
        let result = self.fetch_document().await;

        match &result {
            Ok(keys) => {
                debug!(target: "jwks.source", key_count = keys.len(), "JWKS fetched");
                record_fetch("success", None, start.elapsed());
            }
            Err(e) => {
                record_fetch("error", Some(e.error_type()), start.elapsed());
            }
        }

        result
    }

    async fn fetch_document(&self) -> Result<Vec<Jwk>> {
        debug!(target: "jwks.source", url = %self.url, "Fetching JWKS");

        let response = self
            .http_client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| {
                warn!(target: "jwks.source", url = %self.url, error = %e, "Failed to fetch JWKS");
                JwksError::FetchFailed(format!("Cannot obtain jwks from url {}: {e}", self.url))
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                target: "jwks.source",
                url = %self.url,
                status = %status,
                "JWKS endpoint returned error"
            );
            return Err(JwksError::FetchFailed(format!(
                "Cannot obtain jwks from url {}: status {status}",
                self.url
            )));
        }

        let jwks: JwkSet = response.json().await.map_err(|e| {
            warn!(target: "jwks.source", url = %self.url, error = %e, "Failed to parse JWKS response");
            JwksError::FetchFailed(format!("Failed to parse jwks from {}: {e}", self.url))
        })?;

        if jwks.keys.is_empty() {
            warn!(target: "jwks.source", url = %self.url, "JWKS document contains no keys");
            return Err(JwksError::KeyNotFound(format!("No keys found in {}", self.url)));
        }

        Ok(jwks.keys)
    }
}

#[async_trait::async_trait]
impl KeyProvider for UrlKeySource {
    #[instrument(skip(self), fields(kid = %kid))]
    async fn get(&self, kid: &str) -> Result<Jwk> {
        self.fetch_all()
            .await?
            .into_iter()
            .find(|jwk| jwk.kid == kid)
            .ok_or_else(|| {
                debug!(target: "jwks.source", kid = %kid, "Key not found in JWKS");
                JwksError::KeyNotFound(format!("No key found in {} with kid {kid}", self.url))
            })
    }
}

/// Build the well-known JWKS URL for a domain.
///
/// The domain may be a bare host (`samples.example.com`), in which case
/// HTTPS is assumed, or a URL (`http://localhost:8080`). Any path on the
/// domain is replaced by [`WELL_KNOWN_JWKS_PATH`].
///
/// # Errors
///
/// Returns `JwksError::InvalidConfiguration` if the domain is empty, cannot
/// be parsed, or uses a scheme other than HTTP(S).
pub fn url_for_domain(domain: &str) -> Result<Url> {
    let domain = domain.trim();
    if domain.is_empty() {
        return Err(JwksError::InvalidConfiguration(
            "A domain is required".to_string(),
        ));
    }

    // Only an explicit scheme separator marks a URL; hosts such as
    // `httpbin.example.com` are bare domains.
    let base = if domain.contains("://") {
        domain.to_string()
    } else {
        format!("https://{domain}")
    };

    let url = Url::parse(&base)
        .map_err(|e| JwksError::InvalidConfiguration(format!("Invalid jwks uri '{domain}': {e}")))?;
    check_scheme(&url)?;

    url.join(WELL_KNOWN_JWKS_PATH)
        .map_err(|e| JwksError::InvalidConfiguration(format!("Invalid jwks uri '{domain}': {e}")))
}

/// Parse a full JWKS URL.
///
/// # Errors
///
/// Returns `JwksError::InvalidConfiguration` if the URL is empty, cannot be
/// parsed, or is not HTTP(S).
pub fn parse_jwks_url(url: &str) -> Result<Url> {
    let url = url.trim();
    if url.is_empty() {
        return Err(JwksError::InvalidConfiguration(
            "Cannot build provider without url to jwks".to_string(),
        ));
    }
    let parsed = Url::parse(url)
        .map_err(|e| JwksError::InvalidConfiguration(format!("Invalid jwks uri '{url}': {e}")))?;
    check_scheme(&parsed)?;
    Ok(parsed)
}

fn check_scheme(url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(JwksError::InvalidConfiguration(format!(
            "Unsupported jwks uri scheme '{other}'"
        ))),
    }
}
