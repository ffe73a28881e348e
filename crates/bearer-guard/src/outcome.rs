//! Per-request authentication outcome.
//!
//! Every guarded request gets a fresh [`AuthOutcome`]. It starts
//! unauthenticated and is filled in only after the token passes the check.
//! The outcome is request-scoped: guards pass it to the handler by value
//! and the axum middleware stores it in request extensions.

use crate::claims::Claims;
use std::fmt;

/// Result of authenticating one request.
#[derive(Clone, Default, PartialEq)]
pub struct AuthOutcome {
    /// Whether the request carried a token that passed the check.
    pub authenticated: bool,

    /// The encoded token, set only when authenticated.
    pub raw_token: Option<String>,

    /// Decoded claims, set only when authenticated.
    pub claims: Option<Claims>,
}

impl AuthOutcome {
    /// The reset state: not authenticated, no token, no claims.
    #[must_use]
    pub fn unauthenticated() -> Self {
        Self::default()
    }

    /// Outcome for a request whose token passed the check.
    #[must_use]
    pub fn authenticated(raw_token: String, claims: Claims) -> Self {
        Self {
            authenticated: true,
            raw_token: Some(raw_token),
            claims: Some(claims),
        }
    }

    /// Whether the request is authenticated.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// The `sub` claim of an authenticated request.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.claims.as_ref().and_then(Claims::subject)
    }
}

impl fmt::Debug for AuthOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthOutcome")
            .field("authenticated", &self.authenticated)
            .field("raw_token", &self.raw_token.as_ref().map(|_| "[REDACTED]"))
            .field("claims", &self.claims)
            .finish()
    }
}
