//! Manually advanced clock for cache expiry tests.

use bearer_guard::clock::Clock;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A [`Clock`] that only moves when told to.
///
/// # Example
/// ```rust,ignore
/// let clock = Arc::new(ManualClock::new());
/// let cache = VerificationKeyCache::new(source).with_clock(clock.clone());
/// clock.advance(Duration::from_secs(301));
/// ```
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Start at the current instant.
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }

    /// Time elapsed since the clock was created.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }
}
