//! Mock key provider for pipeline tests.
//!
//! Provides a `KeyProvider` that can be configured to:
//! - Serve any kid, or only a fixed set of kids
//! - Fail every call
//! - Hold each call until the test releases it
//!
//! Every call is counted, and each served record carries a `version`
//! attribute with the call's sequence number, so tests can tell a cached
//! record from a refetched one.
//!
//! # Example
//!
//! ```rust,ignore
//! use jwks_test_utils::MockKeyProvider;
//!
//! let source = MockKeyProvider::new().gated().into_arc();
//! // ... start concurrent gets ...
//! source.release();
//! assert_eq!(source.calls(), 1);
//! ```

use crate::fixtures::test_jwk_json;
use jwks_provider::{Jwk, JwksError, KeyProvider, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Counting, scriptable key provider.
#[derive(Debug, Default)]
pub struct MockKeyProvider {
    known_kids: Option<HashSet<String>>,
    fail: bool,
    gate: Option<Notify>,
    calls: AtomicUsize,
    calls_by_kid: Mutex<HashMap<String, usize>>,
}

impl MockKeyProvider {
    /// Create a mock that serves every kid.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve only the given kids; others are `KeyNotFound`.
    #[must_use]
    pub fn with_kids(mut self, kids: &[&str]) -> Self {
        self.known_kids = Some(kids.iter().map(ToString::to_string).collect());
        self
    }

    /// Fail every call with `FetchFailed("mock failure <n>")`.
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Hold every call until [`MockKeyProvider::release`] is called.
    #[must_use]
    pub fn gated(mut self) -> Self {
        self.gate = Some(Notify::new());
        self
    }

    /// Wrap in an `Arc` for sharing with the pipeline.
    #[must_use]
    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Let one held (or the next) call proceed.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    /// Total number of calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Number of calls for one kid.
    pub fn calls_for(&self, kid: &str) -> usize {
        self.calls_by_kid
            .lock()
            .expect("mock lock poisoned")
            .get(kid)
            .copied()
            .unwrap_or(0)
    }

    /// Wait until at least `count` calls have started.
    pub async fn wait_for_calls(&self, count: usize) {
        while self.calls() < count {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait::async_trait]
impl KeyProvider for MockKeyProvider {
    async fn get(&self, kid: &str) -> Result<Jwk> {
        let version = self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .calls_by_kid
            .lock()
            .expect("mock lock poisoned")
            .entry(kid.to_string())
            .or_insert(0) += 1;

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        if self.fail {
            return Err(JwksError::FetchFailed(format!("mock failure {version}")));
        }

        if let Some(known) = &self.known_kids {
            if !known.contains(kid) {
                return Err(JwksError::KeyNotFound(format!("mock has no key {kid}")));
            }
        }

        let mut value = test_jwk_json(kid);
        value["version"] = version.to_string().into();
        Ok(serde_json::from_value(value).expect("mock JWK should parse"))
    }
}
