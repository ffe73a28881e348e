//! Verification key cache.
//!
//! Holds one verification key together with the instant it was fetched and
//! decides when to refresh it from a [`KeySource`].
//!
//! # Refresh policy
//!
//! - No key cached: retrieve.
//! - Key older than the timeout (strictly greater than): retrieve.
//! - Key pinned with [`VerificationKeyCache::set_permanent_key`]: never
//!   retrieve again.
//!
//! # Concurrency
//!
//! Refreshes are single-flight. Concurrent callers that all find the cache
//! stale queue on one refresh lock; the first performs the retrieval and the
//! rest re-check the cache once they acquire the lock, so one expiry costs
//! one call to the key source. A key pinned while a refresh is in flight
//! wins over the retrieved key.
//!
//! Retrieval errors propagate to every caller that needed the refresh. A
//! stale key is never served in place of a failed refresh.

use crate::clock::{Clock, SystemClock};
use crate::error::KeySourceError;
use crate::key::VerificationKey;
use crate::key_source::{KeySource, UnconfiguredKeySource};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::instrument;

/// Default cache timeout in seconds (5 minutes).
pub const DEFAULT_CACHE_TIMEOUT_SECONDS: u64 = 300;

/// Default cache timeout.
pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_secs(DEFAULT_CACHE_TIMEOUT_SECONDS);

/// When a cached key was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Freshness {
    /// Pinned by the host. Never expires.
    Permanent,

    /// Retrieved from the key source at this instant.
    FetchedAt(Instant),
}

/// Cached key and its freshness.
struct CacheEntry {
    key: VerificationKey,
    freshness: Freshness,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        match self.freshness {
            Freshness::Permanent => false,
            Freshness::FetchedAt(fetched_at) => now.saturating_duration_since(fetched_at) > timeout,
        }
    }
}

/// Cache for a single verification key.
///
/// Owned by whatever wires up the service and shared behind an `Arc`.
pub struct VerificationKeyCache {
    /// Where fresh keys come from.
    source: Arc<dyn KeySource>,

    /// Time source for expiry decisions.
    clock: Arc<dyn Clock>,

    /// How long a retrieved key stays fresh.
    timeout: Duration,

    /// The cached key, if any.
    entry: RwLock<Option<CacheEntry>>,

    /// Serializes refreshes so only one retrieval runs at a time.
    refresh_lock: Mutex<()>,
}

impl VerificationKeyCache {
    /// Create an empty cache refreshing from `source`.
    #[must_use]
    pub fn new(source: Arc<dyn KeySource>) -> Self {
        Self {
            source,
            clock: Arc::new(SystemClock),
            timeout: DEFAULT_CACHE_TIMEOUT,
            entry: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Create a cache with no key source.
    ///
    /// Until a key is pinned, every lookup fails with
    /// `KeySourceError::NotConfigured`.
    #[must_use]
    pub fn unconfigured() -> Self {
        Self::new(Arc::new(UnconfiguredKeySource))
    }

    /// Set how long a retrieved key stays fresh.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use `clock` for expiry decisions.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Start with `key` pinned.
    #[must_use]
    pub fn with_permanent_key(mut self, key: VerificationKey) -> Self {
        self.entry = RwLock::new(Some(CacheEntry {
            key,
            freshness: Freshness::Permanent,
        }));
        self
    }

    /// The configured cache timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Pin `key` and disable all future refreshes.
    ///
    /// Calling this again replaces the pinned key.
    pub async fn set_permanent_key(&self, key: VerificationKey) {
        let mut entry = self.entry.write().await;
        *entry = Some(CacheEntry {
            key,
            freshness: Freshness::Permanent,
        });
        tracing::info!(target: "bearer_guard.key_cache", "Permanent verification key pinned");
    }

    /// Whether the cached key is pinned.
    pub async fn is_pinned(&self) -> bool {
        matches!(
            self.entry.read().await.as_ref(),
            Some(CacheEntry {
                freshness: Freshness::Permanent,
                ..
            })
        )
    }

    /// Drop the cached key, pinned or not.
    ///
    /// The next lookup retrieves from the key source.
    pub async fn clear(&self) {
        let mut entry = self.entry.write().await;
        *entry = None;
        tracing::debug!(target: "bearer_guard.key_cache", "Verification key cache cleared");
    }

    /// Get the current verification key, refreshing it if needed.
    ///
    /// # Errors
    ///
    /// Returns the key source's error if a refresh was needed and failed.
    #[instrument(skip_all, name = "bearer_guard.key_cache.get_key")]
    pub async fn get_key(&self) -> Result<VerificationKey, KeySourceError> {
        if let Some(key) = self.fresh_key().await {
            tracing::trace!(target: "bearer_guard.key_cache", "Verification key cache hit");
            return Ok(key);
        }

        let _refresh = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited for the lock
        if let Some(key) = self.fresh_key().await {
            tracing::debug!(target: "bearer_guard.key_cache", "Verification key refreshed by concurrent caller");
            return Ok(key);
        }

        tracing::debug!(target: "bearer_guard.key_cache", "Verification key missing or expired, retrieving");

        let key = self.source.retrieve_key().await.map_err(|e| {
            tracing::error!(target: "bearer_guard.key_cache", error = %e, "Verification key retrieval failed");
            e
        })?;

        let mut entry = self.entry.write().await;

        // A key pinned during retrieval takes precedence
        if let Some(current) = entry.as_ref() {
            if current.freshness == Freshness::Permanent {
                tracing::debug!(target: "bearer_guard.key_cache", "Key pinned during refresh, discarding retrieved key");
                return Ok(current.key.clone());
            }
        }

        *entry = Some(CacheEntry {
            key: key.clone(),
            freshness: Freshness::FetchedAt(self.clock.now()),
        });

        tracing::info!(
            target: "bearer_guard.key_cache",
            timeout_secs = self.timeout.as_secs(),
            "Verification key cache refreshed"
        );

        Ok(key)
    }

    /// The cached key if it exists and has not expired.
    async fn fresh_key(&self) -> Option<VerificationKey> {
        let entry = self.entry.read().await;
        entry
            .as_ref()
            .filter(|cached| !cached.is_expired(self.clock.now(), self.timeout))
            .map(|cached| cached.key.clone())
    }
}

impl fmt::Debug for VerificationKeyCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationKeyCache")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
