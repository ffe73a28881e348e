//! Bearer token extraction.
//!
//! RFC 6750 defines three ways to send a bearer token: the Authorization
//! header (§2.1), an `access_token` form field (§2.2) and an
//! `access_token` query parameter (§2.3). The default extractor reads all
//! three and requires them to agree.
//!
//! # Rules
//!
//! 1. Each source yields a token or nothing. An Authorization header that
//!    does not start with exactly `"Bearer: "` is a malformed request.
//! 2. Identical tokens from several sources collapse into one.
//! 3. Two or more distinct tokens are a malformed request.
//! 4. Empty values count as absent.
//!
//! The header prefix is `"Bearer: "` (colon, space), not the RFC's
//! `"Bearer "`. Existing clients send the colon form.
//!
//! # Overriding
//!
//! [`TokenExtractor`] is implemented for plain functions and closures, so a
//! host can add its own source and still fall back to [`extract_default`]:
//!
//! ```rust,ignore
//! let extractor = |request: &dyn RequestParts| {
//!     if let Some(token) = request.header("x-api-token") {
//!         return Ok(Some(String::from_utf8_lossy(token).into_owned()));
//!     }
//!     extract_default(request)
//! };
//! ```

use crate::error::AuthError;
use crate::request::RequestParts;
use std::collections::BTreeSet;

/// Prefix the Authorization header value must start with.
pub const BEARER_PREFIX: &str = "Bearer: ";

/// Header carrying the bearer token.
pub const AUTHORIZATION_HEADER: &str = "authorization";

/// Form field and query parameter carrying the bearer token.
pub const ACCESS_TOKEN_PARAM: &str = "access_token";

type SourceFn = fn(&dyn RequestParts) -> Result<Option<String>, AuthError>;

/// Pulls an encoded token out of a request.
pub trait TokenExtractor: Send + Sync {
    /// Extract the token, `None` if the request carries none.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::MalformedRequest` when the request is ambiguous
    /// or badly formatted.
    fn extract_token(&self, request: &dyn RequestParts) -> Result<Option<String>, AuthError>;
}

impl<F> TokenExtractor for F
where
    F: Fn(&dyn RequestParts) -> Result<Option<String>, AuthError> + Send + Sync,
{
    fn extract_token(&self, request: &dyn RequestParts) -> Result<Option<String>, AuthError> {
        self(request)
    }
}

/// The default RFC 6750 extractor. See [`extract_default`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Rfc6750Extractor;

impl TokenExtractor for Rfc6750Extractor {
    fn extract_token(&self, request: &dyn RequestParts) -> Result<Option<String>, AuthError> {
        extract_default(request)
    }
}

/// Extract a token from the header, form body and query string.
///
/// # Errors
///
/// Returns `AuthError::MalformedRequest` if the Authorization header lacks
/// the `"Bearer: "` prefix or the sources carry different tokens.
pub fn extract_default(request: &dyn RequestParts) -> Result<Option<String>, AuthError> {
    let sources: [SourceFn; 3] = [token_from_header, token_from_form, token_from_query];

    let mut tokens = BTreeSet::new();
    for source in sources {
        if let Some(token) = source(request)? {
            tokens.insert(token);
        }
    }

    let mut tokens = tokens.into_iter();
    match (tokens.next(), tokens.next()) {
        (Some(token), None) => Ok(Some(token)),
        (None, _) => Ok(None),
        (Some(_), Some(_)) => {
            tracing::debug!(
                target: "bearer_guard.extract",
                "Request rejected: conflicting tokens from multiple sources"
            );
            Err(AuthError::MalformedRequest("too many tokens".to_string()))
        }
    }
}

/// Token from the Authorization header (RFC 6750 §2.1).
///
/// # Errors
///
/// Returns `AuthError::MalformedRequest` if the header is present but not
/// UTF-8 or does not start with `"Bearer: "`.
pub fn token_from_header(request: &dyn RequestParts) -> Result<Option<String>, AuthError> {
    let Some(raw) = request.header(AUTHORIZATION_HEADER) else {
        return Ok(None);
    };

    let value = std::str::from_utf8(raw).map_err(|_| {
        tracing::debug!(target: "bearer_guard.extract", "Authorization header is not valid UTF-8");
        AuthError::MalformedRequest("Malformed auth header".to_string())
    })?;

    let token = value.strip_prefix(BEARER_PREFIX).ok_or_else(|| {
        tracing::debug!(target: "bearer_guard.extract", "Authorization header missing bearer prefix");
        AuthError::MalformedRequest("Malformed auth header".to_string())
    })?;

    Ok(non_empty(token))
}

/// Token from the `access_token` form field (RFC 6750 §2.2).
///
/// # Errors
///
/// Never fails; the signature matches the other sources.
pub fn token_from_form(request: &dyn RequestParts) -> Result<Option<String>, AuthError> {
    Ok(request.form_field(ACCESS_TOKEN_PARAM).and_then(non_empty))
}

/// Token from the `access_token` query parameter (RFC 6750 §2.3).
///
/// # Errors
///
/// Never fails; the signature matches the other sources.
pub fn token_from_query(request: &dyn RequestParts) -> Result<Option<String>, AuthError> {
    Ok(request.query_param(ACCESS_TOKEN_PARAM).and_then(non_empty))
}

fn non_empty(token: &str) -> Option<String> {
    (!token.is_empty()).then(|| token.to_string())
}
