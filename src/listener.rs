//! Removal listener: a callback invoked whenever an entry leaves the cache.
//!
//! Each physical removal is reported exactly once, with exactly one cause.
//! The notification is delivered synchronously by the thread that claimed
//! the removal, while it still holds the key's shard lock, so notifications
//! for one key arrive in the order the removals happened.
//!
//! # Example
//! ```
//! use lungo::CacheBuilder;
//! use lungo::listener::RemovalCause;
//! use std::sync::{Arc, Mutex};
//!
//! let log: Arc<Mutex<Vec<(u64, RemovalCause)>>> = Arc::new(Mutex::new(Vec::new()));
//! let log2 = Arc::clone(&log);
//!
//! let cache: lungo::Cache<u64, u64> = CacheBuilder::new(2)
//!     .removal_listener(move |key: &u64, _val, cause| {
//!         log2.lock().unwrap().push((*key, cause));
//!     })
//!     .build();
//!
//! cache.put(1, 10).unwrap();
//! cache.put(1, 11).unwrap();
//! cache.invalidate(&1);
//! assert_eq!(
//!     *log.lock().unwrap(),
//!     vec![(1, RemovalCause::Replaced), (1, RemovalCause::Explicit)]
//! );
//! ```

use std::sync::Arc;

// ---------------------------------------------------------------------------
// RemovalCause
// ---------------------------------------------------------------------------

/// The reason an entry was removed from the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RemovalCause {
    /// Removed by the user: `invalidate`, `remove`, or a refresh that
    /// resolved to no value.
    Explicit,
    /// The value was overwritten by `put`, `replace` or a refresh.
    Replaced,
    /// The entry's expiration deadline passed.
    Expired,
    /// Chosen as a victim to keep the total weight within capacity.
    Size,
}

impl RemovalCause {
    /// `true` if the cache removed the entry on its own.
    pub fn was_evicted(self) -> bool {
        matches!(self, RemovalCause::Expired | RemovalCause::Size)
    }
}

// ---------------------------------------------------------------------------
// RemovalListener trait
// ---------------------------------------------------------------------------

/// A callback invoked once per removed entry.
///
/// **Do not call any cache method from inside the listener**: it runs while
/// the cache holds internal locks, and re-entering the cache would deadlock.
pub trait RemovalListener<K, V>: Send + Sync + 'static {
    fn on_removal(&self, key: &K, value: Arc<V>, cause: RemovalCause);
}

/// A [`RemovalListener`] backed by a closure.
///
/// Created via [`CacheBuilder::removal_listener`](crate::CacheBuilder::removal_listener).
pub struct FnListener<F>(pub F);

impl<K, V, F> RemovalListener<K, V> for FnListener<F>
where
    F: Fn(&K, Arc<V>, RemovalCause) + Send + Sync + 'static,
{
    fn on_removal(&self, key: &K, value: Arc<V>, cause: RemovalCause) {
        (self.0)(key, value, cause)
    }
}
