//! Error types for bearer token authentication.
//!
//! Three classes of failure exist and they travel differently:
//!
//! - `MalformedRequest` and `InvalidToken` are per-request authentication
//!   failures. Guards convert them into the failure callback.
//! - `KeyRetrieval` and `InvalidKey` are operational errors. They always
//!   propagate to the host and are never reported as "unauthenticated".

use thiserror::Error;

/// Errors raised while retrieving a verification key.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeySourceError {
    /// No key source has been configured.
    ///
    /// This is what the default source returns: the library has no opinion
    /// on where keys live.
    #[error("No verification key source configured")]
    NotConfigured,

    /// The key source could not be reached or returned an error status.
    #[error("Verification key source unavailable: {0}")]
    Unavailable(String),

    /// The key source answered, but not with a usable key.
    #[error("Invalid verification key response: {0}")]
    InvalidResponse(String),
}

/// Errors produced by token extraction and verification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The request carries a badly formatted Authorization header, or more
    /// than one distinct token.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// The token failed signature or claim verification.
    #[error("The access token is invalid or expired")]
    InvalidToken,

    /// The verification key could not be retrieved.
    #[error("Verification key retrieval failed: {0}")]
    KeyRetrieval(#[from] KeySourceError),

    /// The verification key cannot be used with the configured algorithm.
    #[error("Verification key unusable: {0}")]
    InvalidKey(String),
}

impl AuthError {
    /// Whether this error is a per-request authentication failure rather
    /// than an operational error.
    #[must_use]
    pub fn is_authentication_failure(&self) -> bool {
        matches!(self, Self::MalformedRequest(_) | Self::InvalidToken)
    }
}

/// Operational errors a guard surfaces to its host.
///
/// Authentication failures never appear here; they are handled by the
/// guard's failure hooks.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    /// The verification key could not be retrieved.
    #[error("Verification key retrieval failed: {0}")]
    KeyRetrieval(#[from] KeySourceError),

    /// The verification key cannot be used with the configured algorithm.
    #[error("Verification key unusable: {0}")]
    InvalidKey(String),
}
