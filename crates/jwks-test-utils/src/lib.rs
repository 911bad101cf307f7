//! # JWKS Test Utilities
//!
//! Shared test utilities for the JWKS key provider.
//!
//! This crate provides:
//! - A scriptable mock key provider (`MockKeyProvider`) that counts calls
//! - Deterministic JWK fixtures and JWKS documents
//!
//! ## Usage
//!
//! ```rust,ignore
//! use jwks_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let source = MockKeyProvider::new().with_kids(&["key-1"]).into_arc();
//!     let provider = KeyProviderBuilder::new("https://example.com/jwks.json")?
//!         .build_with_source(source.clone())?;
//!
//!     provider.get("key-1").await?;
//!     assert_eq!(source.calls(), 1);
//! }
//! ```

pub mod fixtures;
pub mod mock_provider;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_provider::*;
