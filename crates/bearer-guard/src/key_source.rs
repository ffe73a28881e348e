//! Sources the verification key cache refreshes from.
//!
//! The cache calls [`KeySource::retrieve_key`] whenever it holds no key or
//! its key has aged past the cache timeout. The default source,
//! [`UnconfiguredKeySource`], always fails: hosts decide where keys live
//! (an HTTP endpoint, a file, an environment variable) and either supply a
//! source or pin a permanent key.

use crate::error::KeySourceError;
use crate::key::VerificationKey;
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::instrument;

/// Default HTTP request timeout for [`HttpKeySource`].
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Retrieves a fresh verification key.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Fetch the current verification key.
    ///
    /// # Errors
    ///
    /// Any error is propagated unchanged to the caller of
    /// `VerificationKeyCache::get_key`; no stale key is substituted.
    async fn retrieve_key(&self) -> Result<VerificationKey, KeySourceError>;
}

/// The default source. Always fails with `KeySourceError::NotConfigured`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredKeySource;

#[async_trait]
impl KeySource for UnconfiguredKeySource {
    async fn retrieve_key(&self) -> Result<VerificationKey, KeySourceError> {
        tracing::error!(
            target: "bearer_guard.key_source",
            "Verification key requested but no key source is configured"
        );
        Err(KeySourceError::NotConfigured)
    }
}

/// Adapts an async closure into a [`KeySource`].
///
/// ```rust,ignore
/// let source = FnKeySource::new(|| async {
///     let pem = tokio::fs::read_to_string("/etc/keys/jwt.pub")
///         .await
///         .map_err(|e| KeySourceError::Unavailable(e.to_string()))?;
///     Ok(VerificationKey::from_pem(pem))
/// });
/// ```
pub struct FnKeySource<F> {
    retrieve: F,
}

impl<F> FnKeySource<F> {
    /// Wrap `retrieve`.
    pub fn new<Fut>(retrieve: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<VerificationKey, KeySourceError>> + Send,
    {
        Self { retrieve }
    }
}

#[async_trait]
impl<F, Fut> KeySource for FnKeySource<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<VerificationKey, KeySourceError>> + Send,
{
    async fn retrieve_key(&self) -> Result<VerificationKey, KeySourceError> {
        (self.retrieve)().await
    }
}

/// Fetches a PEM-encoded public key with an HTTP GET.
///
/// The response body, trimmed, is the key. Any non-success status or an
/// empty body is an error.
#[derive(Debug, Clone)]
pub struct HttpKeySource {
    /// URL serving the PEM key.
    url: String,

    /// HTTP client for fetching the key.
    http_client: reqwest::Client,
}

impl HttpKeySource {
    /// Create a source for `url` with the default timeout.
    #[must_use]
    pub fn new(url: String) -> Self {
        Self::with_timeout(url, DEFAULT_HTTP_TIMEOUT)
    }

    /// Create a source for `url` with a custom request timeout.
    #[must_use]
    pub fn with_timeout(url: String, timeout: Duration) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "bearer_guard.key_source", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self { url, http_client }
    }

    /// The URL keys are fetched from.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    #[instrument(skip_all, fields(url = %self.url))]
    async fn retrieve_key(&self) -> Result<VerificationKey, KeySourceError> {
        tracing::debug!(target: "bearer_guard.key_source", "Fetching verification key");

        let response = self.http_client.get(&self.url).send().await.map_err(|e| {
            tracing::error!(target: "bearer_guard.key_source", error = %e, "Failed to fetch verification key");
            KeySourceError::Unavailable(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            tracing::error!(
                target: "bearer_guard.key_source",
                status = %status,
                "Verification key endpoint returned error"
            );
            return Err(KeySourceError::Unavailable(format!(
                "Key endpoint returned {status}"
            )));
        }

        let body = response.text().await.map_err(|e| {
            tracing::error!(target: "bearer_guard.key_source", error = %e, "Failed to read verification key body");
            KeySourceError::InvalidResponse(e.to_string())
        })?;

        let pem = body.trim();
        if pem.is_empty() {
            tracing::error!(target: "bearer_guard.key_source", "Verification key endpoint returned empty body");
            return Err(KeySourceError::InvalidResponse("empty body".to_string()));
        }

        Ok(VerificationKey::from_pem(pem))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_source_fails() {
        let result = UnconfiguredKeySource.retrieve_key().await;
        assert_eq!(result, Err(KeySourceError::NotConfigured));
    }

    #[tokio::test]
    async fn test_fn_source_delegates_to_closure() {
        let source = FnKeySource::new(|| async { Ok(VerificationKey::from_pem("pem")) });
        let key = source.retrieve_key().await.unwrap();
        assert_eq!(key, VerificationKey::from_pem("pem"));
    }

    #[test]
    fn test_http_source_keeps_url() {
        let source = HttpKeySource::new("http://localhost:8082/jwt.pub".to_string());
        assert_eq!(source.url(), "http://localhost:8082/jwt.pub");
    }
}
