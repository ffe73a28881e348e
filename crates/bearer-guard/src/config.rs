//! Guard configuration.
//!
//! Configuration is loaded from environment variables and is meant to be
//! read once before serving traffic. Key material is redacted in Debug
//! output.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `JWT_ALGO` | `RS256` |
//! | `VERIFICATION_KEY_CACHE_TIMEOUT` | `300` (seconds) |
//! | `JWT_VERIFICATION_KEY` | unset; when set the key is pinned |
//! | `JWT_VERIFICATION_KEY_URL` | unset; when set keys are fetched over HTTP |
//! | `JWT_LEEWAY_SECONDS` | `0` |
//! | `JWT_AUDIENCE` | unset (comma-separated) |
//! | `JWT_ISSUER` | unset (comma-separated) |
//!
//! A pinned key takes precedence over the key URL.

use crate::guard::Guard;
use crate::key::VerificationKey;
use crate::key_cache::{VerificationKeyCache, DEFAULT_CACHE_TIMEOUT_SECONDS};
use crate::key_source::{HttpKeySource, KeySource, UnconfiguredKeySource};
use crate::verify::{TokenVerifier, Verification, DEFAULT_ALGORITHM};
use jsonwebtoken::Algorithm;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Maximum accepted clock leeway in seconds (10 minutes).
pub const MAX_LEEWAY_SECONDS: u64 = 600;

/// Bearer guard configuration.
pub struct GuardConfig {
    /// Signature algorithm tokens must use (default: RS256).
    pub algorithm: Algorithm,

    /// Seconds a retrieved verification key stays fresh (default: 300).
    pub cache_timeout_seconds: u64,

    /// Key pinned at startup. PEM for asymmetric algorithms, the shared
    /// secret for HMAC.
    pub verification_key: Option<SecretString>,

    /// URL serving the PEM verification key.
    pub verification_key_url: Option<String>,

    /// Clock leeway in seconds for `exp` and `nbf` (default: 0).
    pub leeway_seconds: u64,

    /// Accepted `aud` values. Empty disables the audience check.
    pub audience: Vec<String>,

    /// Accepted `iss` values. Empty disables the issuer check.
    pub issuer: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            algorithm: DEFAULT_ALGORITHM,
            cache_timeout_seconds: DEFAULT_CACHE_TIMEOUT_SECONDS,
            verification_key: None,
            verification_key_url: None,
            leeway_seconds: 0,
            audience: Vec::new(),
            issuer: Vec::new(),
        }
    }
}

/// Custom Debug implementation that redacts key material.
impl fmt::Debug for GuardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardConfig")
            .field("algorithm", &self.algorithm)
            .field("cache_timeout_seconds", &self.cache_timeout_seconds)
            .field(
                "verification_key",
                &self.verification_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("verification_key_url", &self.verification_key_url)
            .field("leeway_seconds", &self.leeway_seconds)
            .field("audience", &self.audience)
            .field("issuer", &self.issuer)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid JWT algorithm: {0}")]
    InvalidAlgorithm(String),

    #[error("Invalid verification key cache timeout: {0}")]
    InvalidCacheTimeout(String),

    #[error("Invalid verification key URL: {0}")]
    InvalidKeyUrl(String),

    #[error("Invalid JWT leeway configuration: {0}")]
    InvalidLeeway(String),
}

impl GuardConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any variable is set to an unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any variable is set to an unusable value.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let algorithm = match vars.get("JWT_ALGO") {
            Some(name) => Algorithm::from_str(name.trim()).map_err(|_| {
                ConfigError::InvalidAlgorithm(format!(
                    "JWT_ALGO must name a supported algorithm, got '{name}'"
                ))
            })?,
            None => DEFAULT_ALGORITHM,
        };

        let cache_timeout_seconds = match vars.get("VERIFICATION_KEY_CACHE_TIMEOUT") {
            Some(value_str) => value_str.trim().parse::<u64>().map_err(|e| {
                ConfigError::InvalidCacheTimeout(format!(
                    "VERIFICATION_KEY_CACHE_TIMEOUT must be a non-negative integer, got '{value_str}': {e}"
                ))
            })?,
            None => DEFAULT_CACHE_TIMEOUT_SECONDS,
        };

        // Keys passed through env files often carry literal "\n"
        let verification_key = vars
            .get("JWT_VERIFICATION_KEY")
            .filter(|key| !key.trim().is_empty())
            .map(|key| SecretString::from(key.replace("\\n", "\n")));

        let verification_key_url = match vars.get("JWT_VERIFICATION_KEY_URL") {
            Some(value) if !value.trim().is_empty() => {
                let parsed = url::Url::parse(value.trim()).map_err(|e| {
                    ConfigError::InvalidKeyUrl(format!(
                        "JWT_VERIFICATION_KEY_URL must be an absolute URL, got '{value}': {e}"
                    ))
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(ConfigError::InvalidKeyUrl(format!(
                        "JWT_VERIFICATION_KEY_URL must use http or https, got '{}'",
                        parsed.scheme()
                    )));
                }
                Some(value.trim().to_string())
            }
            _ => None,
        };

        let leeway_seconds = if let Some(value_str) = vars.get("JWT_LEEWAY_SECONDS") {
            let value: u64 = value_str.trim().parse().map_err(|e| {
                ConfigError::InvalidLeeway(format!(
                    "JWT_LEEWAY_SECONDS must be a non-negative integer, got '{value_str}': {e}"
                ))
            })?;

            if value > MAX_LEEWAY_SECONDS {
                return Err(ConfigError::InvalidLeeway(format!(
                    "JWT_LEEWAY_SECONDS must not exceed {MAX_LEEWAY_SECONDS} seconds, got {value}"
                )));
            }

            value
        } else {
            0
        };

        let audience = vars
            .get("JWT_AUDIENCE")
            .map(String::as_str)
            .map(split_list)
            .unwrap_or_default();
        let issuer = vars
            .get("JWT_ISSUER")
            .map(String::as_str)
            .map(split_list)
            .unwrap_or_default();

        Ok(Self {
            algorithm,
            cache_timeout_seconds,
            verification_key,
            verification_key_url,
            leeway_seconds,
            audience,
            issuer,
        })
    }

    /// Set the signature algorithm.
    #[must_use]
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Set the key cache timeout in seconds.
    #[must_use]
    pub fn with_cache_timeout_seconds(mut self, seconds: u64) -> Self {
        self.cache_timeout_seconds = seconds;
        self
    }

    /// Pin `key` at startup.
    #[must_use]
    pub fn with_verification_key(mut self, key: impl Into<String>) -> Self {
        self.verification_key = Some(SecretString::from(key.into()));
        self
    }

    /// Fetch keys from `url`.
    #[must_use]
    pub fn with_verification_key_url(mut self, url: impl Into<String>) -> Self {
        self.verification_key_url = Some(url.into());
        self
    }

    /// Set the clock leeway in seconds.
    #[must_use]
    pub fn with_leeway_seconds(mut self, seconds: u64) -> Self {
        self.leeway_seconds = seconds;
        self
    }

    /// Set the accepted audiences.
    #[must_use]
    pub fn with_audience(mut self, audience: Vec<String>) -> Self {
        self.audience = audience;
        self
    }

    /// Set the accepted issuers.
    #[must_use]
    pub fn with_issuer(mut self, issuer: Vec<String>) -> Self {
        self.issuer = issuer;
        self
    }

    /// The key cache timeout.
    #[must_use]
    pub fn cache_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_timeout_seconds)
    }

    /// Validation settings for the verifier.
    #[must_use]
    pub fn verification(&self) -> Verification {
        Verification::new(self.algorithm)
            .with_leeway(self.leeway_seconds)
            .with_audience(self.audience.as_slice())
            .with_issuer(self.issuer.as_slice())
    }

    /// The pinned key, interpreted for the configured algorithm.
    #[must_use]
    pub fn pinned_key(&self) -> Option<VerificationKey> {
        self.verification_key
            .as_ref()
            .map(|key| VerificationKey::for_algorithm(self.algorithm, key.expose_secret()))
    }

    /// The key source the cache refreshes from.
    ///
    /// HTTP when a key URL is configured, otherwise a source that always
    /// fails.
    #[must_use]
    pub fn key_source(&self) -> Arc<dyn KeySource> {
        match &self.verification_key_url {
            Some(url) => Arc::new(HttpKeySource::new(url.clone())),
            None => Arc::new(UnconfiguredKeySource),
        }
    }

    /// Build the verification key cache.
    #[must_use]
    pub fn build_cache(&self) -> VerificationKeyCache {
        let cache = VerificationKeyCache::new(self.key_source()).with_timeout(self.cache_timeout());
        match self.pinned_key() {
            Some(key) => cache.with_permanent_key(key),
            None => cache,
        }
    }

    /// Build a verifier over a fresh cache.
    #[must_use]
    pub fn build_verifier(&self) -> TokenVerifier {
        TokenVerifier::with_settings(Arc::new(self.build_cache()), self.verification())
    }

    /// Build a guard with the default extractor and checker.
    #[must_use]
    pub fn build_guard(&self) -> Guard {
        Guard::new(Arc::new(self.build_verifier()))
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToString::to_string)
        .collect()
}
