//! # Bearer Guard Test Utilities
//!
//! Shared test utilities for the `bearer-guard` crate.
//!
//! This crate provides:
//! - Deterministic crypto fixtures (fixed RSA keys, seeded Ed25519 keys, an HMAC secret)
//! - Test data builders (`TestTokenBuilder`)
//! - A manually advanced clock (`ManualClock`)
//! - Scripted key sources (`CountingKeySource`, `FailingKeySource`)
//! - Test logging (`init_test_tracing`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bearer_guard_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let pair = TestKeyPair::rsa_a();
//!     let source = Arc::new(CountingKeySource::new(pair.verification_key.clone()));
//!     let cache = VerificationKeyCache::new(source.clone());
//!
//!     let token = TestTokenBuilder::new()
//!         .for_user("alice")
//!         .sign_with(&pair);
//! }
//! ```

pub mod clock;
pub mod crypto_fixtures;
pub mod key_sources;
pub mod logging;
pub mod token_builders;

// Re-export commonly used items
pub use clock::*;
pub use crypto_fixtures::*;
pub use key_sources::*;
pub use logging::*;
pub use token_builders::*;
