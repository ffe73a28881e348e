//! Required and optional authentication guards.
//!
//! A [`Guard`] wraps a protected handler. For every invocation it starts
//! from an unauthenticated [`AuthOutcome`], extracts a token, checks it and,
//! on success, decodes its claims and hands the populated outcome to the
//! handler.
//!
//! The two wrappers differ only in what happens on failure:
//!
//! - [`Guard::required`] calls [`FailureHooks::on_required_failure`] and
//!   returns its result *instead of* running the handler.
//! - [`Guard::optional`] calls [`FailureHooks::on_optional_failure`] and
//!   then runs the handler anyway with the unauthenticated outcome.
//!
//! Malformed requests, missing tokens and rejected tokens are all
//! failures. Key retrieval and unusable-key errors are not: they surface as
//! [`GuardError`] from both wrappers and the handler does not run.

use crate::claims::Claims;
use crate::error::{AuthError, GuardError};
use crate::extract::{Rfc6750Extractor, TokenExtractor};
use crate::outcome::AuthOutcome;
use crate::request::RequestParts;
use crate::verify::{TokenChecker, TokenVerifier, Verify};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::instrument;

/// Why a request was not authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Bad Authorization header, or conflicting tokens.
    MalformedRequest,

    /// No token in any source.
    MissingToken,

    /// The token did not pass the check.
    InvalidToken,
}

impl FailureReason {
    /// Stable machine-readable name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MalformedRequest => "malformed_request",
            Self::MissingToken => "missing_token",
            Self::InvalidToken => "invalid_token",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`Guard::authenticate`].
#[derive(Debug, Clone, PartialEq)]
pub enum Authentication {
    /// The token passed; the outcome carries the token and claims.
    Authenticated(AuthOutcome),

    /// The request is not authenticated.
    Rejected(FailureReason),
}

/// Authorization denied. The default result of a required-auth failure.
///
/// Result types opt in with `From<Denied>`; the axum integration turns it
/// into a 401 response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Denied {
    /// Why the request was denied.
    pub reason: FailureReason,
}

/// Callbacks invoked when authentication fails.
///
/// Implemented for any `Fn(FailureReason) -> R` closure, which covers the
/// common case of only customizing the required-auth result.
pub trait FailureHooks<R>: Send + Sync {
    /// Produce the result returned in place of the handler's.
    fn on_required_failure(&self, reason: FailureReason) -> R;

    /// Called before an optional-auth handler runs unauthenticated.
    fn on_optional_failure(&self, reason: FailureReason) {
        let _ = reason;
    }
}

impl<R, F> FailureHooks<R> for F
where
    F: Fn(FailureReason) -> R + Send + Sync,
{
    fn on_required_failure(&self, reason: FailureReason) -> R {
        self(reason)
    }
}

/// Signals [`Denied`] on required failure; does nothing on optional failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFailureHooks;

impl<R: From<Denied>> FailureHooks<R> for DefaultFailureHooks {
    fn on_required_failure(&self, reason: FailureReason) -> R {
        R::from(Denied { reason })
    }
}

/// Extracts, checks and decodes bearer tokens for guarded handlers.
#[derive(Clone)]
pub struct Guard {
    /// Pulls the token out of the request.
    extractor: Arc<dyn TokenExtractor>,

    /// Custom acceptance rule. `None` means the verifier alone decides.
    checker: Option<Arc<dyn TokenChecker>>,

    /// Verifies tokens and decodes claims of accepted ones.
    verifier: Arc<TokenVerifier>,
}

impl Guard {
    /// Guard with the default extractor and `verifier` as the checker.
    #[must_use]
    pub fn new(verifier: Arc<TokenVerifier>) -> Self {
        Self::builder(verifier).build()
    }

    /// Start building a guard around `verifier`.
    #[must_use]
    pub fn builder(verifier: Arc<TokenVerifier>) -> GuardBuilder {
        GuardBuilder {
            verifier,
            extractor: None,
            checker: None,
        }
    }

    /// The verifier used to decode claims.
    #[must_use]
    pub fn verifier(&self) -> &Arc<TokenVerifier> {
        &self.verifier
    }

    /// Authenticate `request` without running anything.
    ///
    /// # Errors
    ///
    /// Returns `GuardError` if the verification key could not be retrieved
    /// or used. Authentication failures are `Ok(Authentication::Rejected)`.
    #[instrument(skip_all, name = "bearer_guard.guard.authenticate")]
    pub async fn authenticate(
        &self,
        request: &dyn RequestParts,
    ) -> Result<Authentication, GuardError> {
        let token = match self.extractor.extract_token(request) {
            Ok(Some(token)) => token,
            Ok(None) => return Ok(reject(FailureReason::MissingToken)),
            Err(e) => return escalate(e).map(reject),
        };

        let claims = match self.accepted_claims(&token).await {
            Ok(Some(claims)) => claims,
            Ok(None) => return Ok(reject(FailureReason::InvalidToken)),
            Err(e) => return escalate(e).map(reject),
        };

        tracing::debug!(target: "bearer_guard.guard", "Request authenticated");
        Ok(Authentication::Authenticated(AuthOutcome::authenticated(
            token, claims,
        )))
    }

    /// Claims of `token` if it is accepted, `None` if it is not.
    ///
    /// Without a custom checker the key is fetched once and the same key
    /// both verifies the token and decodes its claims.
    async fn accepted_claims(&self, token: &str) -> Result<Option<Claims>, AuthError> {
        let decoded = match &self.checker {
            None => {
                let key = self.verifier.cache().get_key().await?;
                self.verifier.decode_with_key(token, &key)
            }
            Some(checker) => {
                if !checker.check_token(token).await? {
                    return Ok(None);
                }
                self.verifier.decoded_claims(token, Verify::Full).await
            }
        };

        match decoded {
            Ok(claims) => Ok(Some(claims)),
            Err(AuthError::InvalidToken) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Run `handler` only if `request` authenticates.
    ///
    /// On failure, returns `hooks.on_required_failure(reason)` and `handler`
    /// is never called.
    ///
    /// # Errors
    ///
    /// Returns `GuardError` on key retrieval or key usage errors.
    pub async fn required<H, R, F, Fut>(
        &self,
        request: &dyn RequestParts,
        hooks: &H,
        handler: F,
    ) -> Result<R, GuardError>
    where
        H: FailureHooks<R> + ?Sized,
        F: FnOnce(AuthOutcome) -> Fut,
        Fut: Future<Output = R>,
    {
        match self.authenticate(request).await? {
            Authentication::Authenticated(outcome) => Ok(handler(outcome).await),
            Authentication::Rejected(reason) => Ok(hooks.on_required_failure(reason)),
        }
    }

    /// Run `handler` whether or not `request` authenticates.
    ///
    /// On failure, calls `hooks.on_optional_failure(reason)` and then runs
    /// `handler` with an unauthenticated outcome.
    ///
    /// # Errors
    ///
    /// Returns `GuardError` on key retrieval or key usage errors.
    pub async fn optional<H, R, F, Fut>(
        &self,
        request: &dyn RequestParts,
        hooks: &H,
        handler: F,
    ) -> Result<R, GuardError>
    where
        H: FailureHooks<R> + ?Sized,
        F: FnOnce(AuthOutcome) -> Fut,
        Fut: Future<Output = R>,
    {
        let outcome = match self.authenticate(request).await? {
            Authentication::Authenticated(outcome) => outcome,
            Authentication::Rejected(reason) => {
                hooks.on_optional_failure(reason);
                AuthOutcome::unauthenticated()
            }
        };
        Ok(handler(outcome).await)
    }
}

impl fmt::Debug for Guard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Guard")
            .field("verifier", &self.verifier)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Guard`] with replaceable extraction and checking.
pub struct GuardBuilder {
    verifier: Arc<TokenVerifier>,
    extractor: Option<Arc<dyn TokenExtractor>>,
    checker: Option<Arc<dyn TokenChecker>>,
}

impl GuardBuilder {
    /// Replace the token extractor.
    #[must_use]
    pub fn extractor(mut self, extractor: impl TokenExtractor + 'static) -> Self {
        self.extractor = Some(Arc::new(extractor));
        self
    }

    /// Replace the token checker.
    ///
    /// Accepted tokens are then verified again when their claims are
    /// decoded.
    #[must_use]
    pub fn checker(mut self, checker: impl TokenChecker + 'static) -> Self {
        self.checker = Some(Arc::new(checker));
        self
    }

    /// Build the guard.
    #[must_use]
    pub fn build(self) -> Guard {
        Guard {
            extractor: self
                .extractor
                .unwrap_or_else(|| Arc::new(Rfc6750Extractor)),
            checker: self.checker,
            verifier: self.verifier,
        }
    }
}

fn reject(reason: FailureReason) -> Authentication {
    tracing::debug!(target: "bearer_guard.guard", reason = %reason, "Request not authenticated");
    Authentication::Rejected(reason)
}

/// Split an `AuthError` into a per-request failure or an operational error.
fn escalate(error: AuthError) -> Result<FailureReason, GuardError> {
    match error {
        AuthError::MalformedRequest(_) => Ok(FailureReason::MalformedRequest),
        AuthError::InvalidToken => Ok(FailureReason::InvalidToken),
        AuthError::KeyRetrieval(e) => {
            tracing::error!(target: "bearer_guard.guard", error = %e, "Verification key retrieval failed");
            Err(GuardError::KeyRetrieval(e))
        }
        AuthError::InvalidKey(message) => {
            tracing::error!(target: "bearer_guard.guard", error = %message, "Verification key unusable");
            Err(GuardError::InvalidKey(message))
        }
    }
}
