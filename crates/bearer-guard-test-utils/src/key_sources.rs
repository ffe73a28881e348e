//! Scripted key sources.
//!
//! `CountingKeySource` records how often the cache asked for a key, which is
//! how tests observe refresh behavior.

use async_trait::async_trait;
use bearer_guard::key_source::KeySource;
use bearer_guard::{KeySourceError, VerificationKey};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Returns a fixed key and counts calls.
pub struct CountingKeySource {
    keys: Mutex<Vec<VerificationKey>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl CountingKeySource {
    /// Always return `key`.
    pub fn new(key: VerificationKey) -> Self {
        Self::sequence(vec![key])
    }

    /// Return `keys` in order, repeating the last one once exhausted.
    pub fn sequence(keys: Vec<VerificationKey>) -> Self {
        assert!(!keys.is_empty(), "CountingKeySource needs at least one key");
        Self {
            keys: Mutex::new(keys),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Sleep for `delay` before answering, so concurrent callers overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of retrievals so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySource for CountingKeySource {
    async fn retrieve_key(&self) -> Result<VerificationKey, KeySourceError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let keys = self.keys.lock().unwrap();
        let index = n.min(keys.len() - 1);
        Ok(keys[index].clone())
    }
}

/// Always fails with the given error and counts calls.
pub struct FailingKeySource {
    error: KeySourceError,
    calls: AtomicUsize,
}

impl FailingKeySource {
    /// Fail every retrieval with `error`.
    pub fn new(error: KeySourceError) -> Self {
        Self {
            error,
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of retrievals so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySource for FailingKeySource {
    async fn retrieve_key(&self) -> Result<VerificationKey, KeySourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sequence_repeats_last_key() {
        let source = CountingKeySource::sequence(vec![
            VerificationKey::from_pem("one"),
            VerificationKey::from_pem("two"),
        ]);

        assert_eq!(source.retrieve_key().await.unwrap(), VerificationKey::from_pem("one"));
        assert_eq!(source.retrieve_key().await.unwrap(), VerificationKey::from_pem("two"));
        assert_eq!(source.retrieve_key().await.unwrap(), VerificationKey::from_pem("two"));
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_failing_source_counts_calls() {
        let source = FailingKeySource::new(KeySourceError::Unavailable("down".to_string()));
        assert!(source.retrieve_key().await.is_err());
        assert_eq!(source.calls(), 1);
    }
}
