//! JWT verification.
//!
//! [`TokenVerifier`] decodes a compact JWT against the key held by a
//! [`VerificationKeyCache`] using one configured algorithm.
//!
//! # Outcomes
//!
//! - Signature, structure and claim failures are invalid tokens.
//!   `check_token` reports them as `Ok(false)`.
//! - Key retrieval failures and unusable keys are operational errors and
//!   always propagate as `Err`.
//!
//! `exp` is not required, but it is validated when present, as is `nbf`.
//! `aud` and `iss` are checked only when expected values are configured;
//! otherwise any value is accepted.

use crate::claims::Claims;
use crate::error::AuthError;
use crate::key::VerificationKey;
use crate::key_cache::VerificationKeyCache;
use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{decode, Algorithm, Validation};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::instrument;

/// Algorithm used when none is configured.
pub const DEFAULT_ALGORITHM: Algorithm = Algorithm::RS256;

/// Whether to check the signature when decoding claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verify {
    /// Check the signature and claims against the cached key.
    #[default]
    Full,

    /// Decode without any verification.
    ///
    /// Claims decoded this way are untrusted and must not be used for
    /// authorization decisions.
    Skip,
}

/// Validation settings applied to every token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    algorithm: Algorithm,
    leeway_seconds: u64,
    audience: Vec<String>,
    issuer: Vec<String>,
}

impl Default for Verification {
    fn default() -> Self {
        Self {
            algorithm: DEFAULT_ALGORITHM,
            leeway_seconds: 0,
            audience: Vec::new(),
            issuer: Vec::new(),
        }
    }
}

impl Verification {
    /// Settings for `algorithm` with no leeway, audience or issuer.
    #[must_use]
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            ..Self::default()
        }
    }

    /// Allow `seconds` of clock skew on `exp` and `nbf`.
    #[must_use]
    pub fn with_leeway(mut self, seconds: u64) -> Self {
        self.leeway_seconds = seconds;
        self
    }

    /// Require `aud` to match one of `audience`.
    #[must_use]
    pub fn with_audience<T: ToString>(mut self, audience: &[T]) -> Self {
        self.audience = audience.iter().map(ToString::to_string).collect();
        self
    }

    /// Require `iss` to match one of `issuer`.
    #[must_use]
    pub fn with_issuer<T: ToString>(mut self, issuer: &[T]) -> Self {
        self.issuer = issuer.iter().map(ToString::to_string).collect();
        self
    }

    /// The signature algorithm tokens must use.
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Allowed clock skew in seconds.
    #[must_use]
    pub fn leeway_seconds(&self) -> u64 {
        self.leeway_seconds
    }

    /// Build the `jsonwebtoken` validation for these settings.
    #[must_use]
    pub fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        validation.required_spec_claims.clear();
        validation.leeway = self.leeway_seconds;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        if self.audience.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(self.audience.as_slice());
            validation.required_spec_claims.insert("aud".to_string());
        }
        if !self.issuer.is_empty() {
            validation.set_issuer(self.issuer.as_slice());
            validation.required_spec_claims.insert("iss".to_string());
        }
        validation
    }
}

/// Decides whether a token is acceptable.
///
/// Implement this to add authorization rules on top of signature
/// verification. An override can hold the default [`TokenVerifier`] and
/// delegate to it:
///
/// ```rust,ignore
/// struct RequireScope {
///     verifier: Arc<TokenVerifier>,
///     scope: String,
/// }
///
/// #[async_trait]
/// impl TokenChecker for RequireScope {
///     async fn check_token(&self, token: &str) -> Result<bool, AuthError> {
///         if !self.verifier.check_token(token).await? {
///             return Ok(false);
///         }
///         let claims = self.verifier.decoded_claims(token, Verify::Full).await?;
///         Ok(claims.has_scope(&self.scope))
///     }
/// }
/// ```
#[async_trait]
pub trait TokenChecker: Send + Sync {
    /// `Ok(true)` if the token is acceptable, `Ok(false)` if it is not.
    ///
    /// # Errors
    ///
    /// Operational errors (key retrieval, unusable key) propagate.
    async fn check_token(&self, token: &str) -> Result<bool, AuthError>;
}

/// Default token verification against the cached key.
#[derive(Debug)]
pub struct TokenVerifier {
    /// Source of the verification key.
    cache: Arc<VerificationKeyCache>,

    /// Validation settings.
    settings: Verification,
}

impl TokenVerifier {
    /// Create a verifier with default settings (RS256, no leeway).
    pub fn new(cache: Arc<VerificationKeyCache>) -> Self {
        Self::with_settings(cache, Verification::default())
    }

    /// Create a verifier with explicit settings.
    pub fn with_settings(cache: Arc<VerificationKeyCache>, settings: Verification) -> Self {
        Self { cache, settings }
    }

    /// The key cache this verifier reads from.
    #[must_use]
    pub fn cache(&self) -> &Arc<VerificationKeyCache> {
        &self.cache
    }

    /// The validation settings.
    #[must_use]
    pub fn settings(&self) -> &Verification {
        &self.settings
    }

    /// Check `token` against the cached key.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::KeyRetrieval` if the key could not be fetched
    /// and `AuthError::InvalidKey` if it cannot verify the configured
    /// algorithm. Invalid tokens are `Ok(false)`, never an error.
    #[instrument(skip_all, name = "bearer_guard.verify.check_token")]
    pub async fn check_token(&self, token: &str) -> Result<bool, AuthError> {
        let key = self.cache.get_key().await?;
        self.check_token_with_key(token, &key)
    }

    /// Check `token` against an explicit key, bypassing the cache.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidKey` if `key` cannot verify the
    /// configured algorithm.
    pub fn check_token_with_key(&self, token: &str, key: &VerificationKey) -> Result<bool, AuthError> {
        match self.decode_with_key(token, key) {
            Ok(_) => Ok(true),
            Err(AuthError::InvalidToken) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Decode the claims of `token`.
    ///
    /// With [`Verify::Skip`] the key cache is not consulted at all.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidToken` if the token does not decode (or,
    /// with [`Verify::Full`], does not verify). Operational errors
    /// propagate as with [`TokenVerifier::check_token`].
    #[instrument(skip_all, name = "bearer_guard.verify.decoded_claims", fields(verify = ?verify))]
    pub async fn decoded_claims(&self, token: &str, verify: Verify) -> Result<Claims, AuthError> {
        match verify {
            Verify::Full => {
                let key = self.cache.get_key().await?;
                self.decode_with_key(token, &key)
            }
            Verify::Skip => decode_unverified(token),
        }
    }

    /// Verify `token` against `key` and return its claims.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidToken` for any verification failure and
    /// `AuthError::InvalidKey` if `key` cannot verify the configured
    /// algorithm.
    pub fn decode_with_key(&self, token: &str, key: &VerificationKey) -> Result<Claims, AuthError> {
        let decoding_key = key.decoding_key(self.settings.algorithm)?;
        let validation = self.settings.validation();

        let token_data = decode::<Claims>(token, &decoding_key, &validation).map_err(classify)?;

        tracing::debug!(target: "bearer_guard.verify", "Token verified successfully");
        Ok(token_data.claims)
    }
}

#[async_trait]
impl TokenChecker for TokenVerifier {
    async fn check_token(&self, token: &str) -> Result<bool, AuthError> {
        TokenVerifier::check_token(self, token).await
    }
}

/// Decode the claims of `token` without checking its signature or claims.
///
/// The header only has to be a JSON object; its `alg` is not inspected, so
/// unsigned (`alg: none`) tokens decode too.
///
/// # Errors
///
/// Returns `AuthError::InvalidToken` if the token is not three
/// dot-separated base64url segments with JSON object header and payload.
pub fn decode_unverified(token: &str) -> Result<Claims, AuthError> {
    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        tracing::debug!(target: "bearer_guard.verify", "Token is not a three-segment JWT");
        return Err(AuthError::InvalidToken);
    };

    let _header: Map<String, Value> = decode_segment(header)?;
    let claims: Claims = decode_segment(payload)?;

    tracing::debug!(target: "bearer_guard.verify", "Token decoded without verification");
    Ok(claims)
}

fn decode_segment<T: DeserializeOwned>(segment: &str) -> Result<T, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment.trim_end_matches('='))
        .map_err(|e| {
            tracing::debug!(target: "bearer_guard.verify", error = %e, "Token segment is not base64url");
            AuthError::InvalidToken
        })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        tracing::debug!(target: "bearer_guard.verify", error = %e, "Token segment is not a JSON object");
        AuthError::InvalidToken
    })
}

/// Map a `jsonwebtoken` error onto the auth taxonomy.
///
/// Key construction problems are configuration errors; everything else
/// means the token itself is unacceptable.
fn classify(error: jsonwebtoken::errors::Error) -> AuthError {
    match error.kind() {
        ErrorKind::InvalidEcdsaKey | ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidKeyFormat => {
            tracing::warn!(target: "bearer_guard.verify", error = %error, "Verification key unusable");
            AuthError::InvalidKey(error.to_string())
        }
        _ => {
            tracing::debug!(target: "bearer_guard.verify", error = %error, "Token verification failed");
            AuthError::InvalidToken
        }
    }
}
