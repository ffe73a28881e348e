//! Time source for the verification key cache.
//!
//! The cache asks a [`Clock`] for the current instant instead of calling
//! `Instant::now()` directly, so tests can drive expiry deterministically.

use std::time::Instant;

/// A monotonic time source.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// Wall-clock time via [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
