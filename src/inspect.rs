//! Read-only views of per-entry expiration metadata.
//!
//! Nothing here counts as an access: timestamps, statistics and the size
//! policy's order are left untouched.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::Inner;
use crate::future::ValueFuture;

/// Returned by `policy()` on every cache handle.
pub struct Inspector<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Inspector<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn new(inner: Arc<Inner<K, V>>) -> Self {
        Inspector { inner }
    }

    /// Time since the key's value was written.  `None` for an absent,
    /// expired or still-computing key.
    pub fn age_of(&self, key: &K) -> Option<Duration> {
        let entry = self.inner.peek(key).filter(|entry| entry.is_ready())?;
        let now = self.inner.ticker.read();
        Some(Duration::from_nanos(now.saturating_sub(entry.write_time())))
    }

    /// Time left before the key expires.  `None` if the key is absent or
    /// still computing, or if no expiration applies to it.
    pub fn expires_after(&self, key: &K) -> Option<Duration> {
        let entry = self.inner.peek(key).filter(|entry| entry.is_ready())?;
        let deadline = self.inner.expiration.deadline(&entry)?;
        let now = self.inner.ticker.read();
        Some(Duration::from_nanos(deadline.saturating_sub(now)))
    }

    /// The refreshes currently in flight, by key.
    pub fn refreshes(&self) -> HashMap<K, ValueFuture<V>> {
        self.inner.refreshes.snapshot()
    }

    /// The key's completed value, without recording a read or waiting for a
    /// computation.
    pub fn get_if_present_quietly(&self, key: &K) -> Option<Arc<V>> {
        self.inner.peek(key)?.value().peek_value()
    }

    /// Total weight of the entries the size policy tracks.
    pub fn weighted_size(&self) -> u64 {
        self.inner.weighted_size()
    }

    pub fn max_capacity(&self) -> u64 {
        self.inner.max_capacity()
    }
}
