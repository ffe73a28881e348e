//! Bearer token authentication for HTTP request handlers.
//!
//! Extracts an RFC 6750 bearer token from a request, verifies its JWT
//! signature against a cached verification key, and hands the decoded
//! claims to the protected handler.
//!
//! # Components
//!
//! - [`key_cache`] - verification key cache with timed refresh and pinning
//! - [`extract`] - token extraction from header, form body and query string
//! - [`verify`] - JWT signature and claim verification
//! - [`guard`] - required/optional guard wrappers around a handler
//! - [`http`] - axum middleware built on the guard
//!
//! # Example
//!
//! ```rust,ignore
//! use bearer_guard::config::GuardConfig;
//! use bearer_guard::http::{require_auth, AuthState};
//! use bearer_guard::AuthOutcome;
//! use std::sync::Arc;
//!
//! let config = GuardConfig::from_env()?;
//! let state = Arc::new(AuthState::new(config.build_guard()));
//!
//! let app = Router::new()
//!     .route("/me", get(me))
//!     .layer(axum::middleware::from_fn_with_state(state, require_auth));
//!
//! async fn me(outcome: AuthOutcome) -> String {
//!     outcome.subject().unwrap_or_default().to_string()
//! }
//! ```

#![warn(clippy::pedantic)]

/// Decoded JWT claims
pub mod claims;

/// Injectable time source for the key cache
pub mod clock;

/// Configuration loaded from the environment
pub mod config;

/// Error types
pub mod error;

/// Token extraction from requests
pub mod extract;

/// Required/optional guard wrappers
pub mod guard;

/// axum middleware and extractors
pub mod http;

/// Verification key material
pub mod key;

/// Verification key cache
pub mod key_cache;

/// Sources the cache refreshes keys from
pub mod key_source;

/// Per-request authentication outcome
pub mod outcome;

/// Inbound request shape
pub mod request;

/// JWT verification
pub mod verify;

pub use claims::Claims;
pub use error::{AuthError, GuardError, KeySourceError};
pub use guard::{Guard, GuardBuilder};
pub use key::VerificationKey;
pub use key_cache::VerificationKeyCache;
pub use outcome::AuthOutcome;
pub use request::{BearerRequest, RequestParts};
pub use verify::{TokenVerifier, Verification, Verify};
