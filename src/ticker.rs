//! Monotonic nanosecond time sources.
//!
//! Every timestamp the cache records (write time, access time, variable
//! deadline, wheel position) is a `u64` count of nanoseconds read from a
//! [`Ticker`].  Production caches use [`SystemTicker`]; tests inject a
//! [`FakeTicker`] and advance it by hand so expiration is fully deterministic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A monotonic source of nanoseconds.
///
/// Implementations must never go backwards.
pub trait Ticker: Send + Sync + 'static {
    fn read(&self) -> u64;
}

/// Nanoseconds elapsed since the ticker was created, from [`Instant`].
#[derive(Debug)]
pub struct SystemTicker {
    epoch: Instant,
}

impl SystemTicker {
    pub fn new() -> Self {
        SystemTicker {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemTicker {
    fn default() -> Self {
        Self::new()
    }
}

impl Ticker for SystemTicker {
    #[inline]
    fn read(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

/// A manually advanced ticker for tests.
///
/// Cloning is cheap; clones share the same clock.
#[derive(Clone, Debug, Default)]
pub struct FakeTicker {
    nanos: std::sync::Arc<AtomicU64>,
}

impl FakeTicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the clock forward by `d`.
    pub fn advance(&self, d: Duration) {
        self.nanos.fetch_add(d.as_nanos() as u64, Ordering::SeqCst);
    }

    pub fn advance_nanos(&self, nanos: u64) {
        self.nanos.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl Ticker for FakeTicker {
    #[inline]
    fn read(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

impl<T: Ticker> Ticker for std::sync::Arc<T> {
    #[inline]
    fn read(&self) -> u64 {
        (**self).read()
    }
}
