use std::collections::HashMap;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::builder::CacheBuilder;
use crate::cache::{Claim, Inner, Write};
use crate::error::{BoxError, CacheError};
use crate::future::{collect_keyed, ValueFuture};
use crate::inspect::Inspector;
use crate::listener::RemovalCause;
use crate::loader::{completed_bulk, load_all_or_each, CacheLoader};
use crate::metrics::stats::Metrics;

// ---------------------------------------------------------------------------
// Cache handle
// ---------------------------------------------------------------------------

/// A concurrent in-memory cache with time-based expiration.
///
/// Cloning is cheap; clones share the same storage.
///
/// # Example
/// ```
/// use lungo::CacheBuilder;
/// use std::time::Duration;
///
/// let cache: lungo::Cache<String, String> = CacheBuilder::new(100)
///     .expire_after_write(Duration::from_secs(60))
///     .build();
/// cache.put("hello".to_string(), "world".to_string()).unwrap();
/// assert_eq!(
///     cache.get_if_present(&"hello".to_string()).as_deref(),
///     Some(&"world".to_string())
/// );
/// ```
pub struct Cache<K, V> {
    pub(crate) inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Cache {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Waits for a stored future and keeps only a value.
fn resolve<V>(future: &ValueFuture<V>) -> Option<Arc<V>> {
    future.join().ok().flatten()
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Returns a [`CacheBuilder`] for constructing a new cache.
    pub fn builder(max_capacity: u64) -> CacheBuilder<K, V> {
        CacheBuilder::new(max_capacity)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Returns the value for `key` if it exists and has not expired.
    ///
    /// Waits if the value is still being computed by another caller.
    pub fn get_if_present(&self, key: &K) -> Option<Arc<V>> {
        match self.inner.lookup(key, false) {
            Ok(Some(entry)) => {
                self.inner.metrics.record_hit();
                resolve(entry.value())
            }
            _ => {
                self.inner.metrics.record_miss();
                None
            }
        }
    }

    /// Like [`get_if_present`](Cache::get_if_present), but reports a failing
    /// `expire_after_read` and a failed in-flight computation.
    pub fn try_get_if_present(&self, key: &K) -> Result<Option<Arc<V>>, CacheError> {
        match self.inner.lookup(key, true)? {
            Some(entry) => {
                self.inner.metrics.record_hit();
                entry.value().join()
            }
            None => {
                self.inner.metrics.record_miss();
                Ok(None)
            }
        }
    }

    /// Returns the value for `key`, computing it with `f` if absent.
    ///
    /// Concurrent callers for the same key share one computation.  `f`
    /// returning `None` caches nothing.
    pub fn get_with<F>(&self, key: K, f: F) -> Result<Option<Arc<V>>, CacheError>
    where
        F: FnOnce(&K) -> Option<V>,
    {
        self.try_get_with(key, |k| Ok(f(k)))
    }

    /// Like [`get_with`](Cache::get_with) for a fallible computation.  The
    /// error is returned to every caller waiting on it and nothing is cached.
    pub fn try_get_with<F>(&self, key: K, f: F) -> Result<Option<Arc<V>>, CacheError>
    where
        F: FnOnce(&K) -> Result<Option<V>, BoxError>,
    {
        match self.inner.get_or_insert_pending(&key)? {
            Claim::Hit(future) => future.join(),
            Claim::Miss(entry) => self.inner.load_pending(&entry, || f(&key)),
        }
    }

    /// Returns the values for `keys` in the order given, loading every miss
    /// with a single call to `f`.
    ///
    /// Duplicate keys are collapsed and keys without a value are left out.
    /// Extra entries returned by `f` are cached as well.
    pub fn get_all<I, F>(&self, keys: I, f: F) -> Result<IndexMap<K, Arc<V>>, CacheError>
    where
        I: IntoIterator<Item = K>,
        F: FnOnce(&[K]) -> Result<HashMap<K, V>, BoxError>,
    {
        let pending = self.inner.get_all(keys, |missing| completed_bulk(f(&missing)));
        futures::executor::block_on(pending)
    }

    /// Returns a point-in-time copy of every live entry.
    pub fn entries(&self) -> Vec<(K, Arc<V>)> {
        self.inner.snapshot()
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Inserts `value` for `key`, replacing any previous value.
    ///
    /// Fails only if the variable expiry policy rejects the value; the cache
    /// is then left unchanged.
    pub fn put(&self, key: K, value: V) -> Result<(), CacheError> {
        self.inner.put(&key, ValueFuture::completed(value)).map(|_| ())
    }

    /// Replaces the value of a present key.  Returns the previous value, or
    /// `None` (and changes nothing) if the key was absent.
    pub fn replace(&self, key: K, value: V) -> Result<Option<Arc<V>>, CacheError> {
        let computed = self.inner.compute(&key, |live| match live {
            Some(_) => Write::Insert(ValueFuture::completed(value)),
            None => Write::Keep,
        })?;
        Ok(computed.previous.and_then(|entry| resolve(entry.value())))
    }

    /// Replaces the value of `key` only if the current value satisfies
    /// `predicate`.
    pub fn replace_if<P>(&self, key: K, predicate: P, value: V) -> Result<bool, CacheError>
    where
        P: FnOnce(&V) -> bool,
    {
        let mut replaced = false;
        self.inner.compute(&key, |live| {
            let current = live.and_then(|entry| entry.value().peek_value());
            if current.is_some_and(|current| predicate(&*current)) {
                replaced = true;
                Write::Insert(ValueFuture::completed(value))
            } else {
                Write::Keep
            }
        })?;
        Ok(replaced)
    }

    /// Removes `key`, returning its value.
    pub fn remove(&self, key: &K) -> Option<Arc<V>> {
        self.inner.remove(key).and_then(|entry| resolve(entry.value()))
    }

    /// Removes `key` only if its current value satisfies `predicate`.
    pub fn remove_if<P>(&self, key: &K, predicate: P) -> bool
    where
        P: FnOnce(&V) -> bool,
    {
        let mut removed = false;
        let _ = self.inner.compute(key, |live| {
            let current = live.and_then(|entry| entry.value().peek_value());
            if current.is_some_and(|current| predicate(&*current)) {
                removed = true;
                Write::Remove(RemovalCause::Explicit)
            } else {
                Write::Keep
            }
        });
        if removed {
            self.inner.refreshes.discard(key);
        }
        removed
    }

    /// Removes the entry for `key`, if present, and forgets any refresh in
    /// flight for it.
    pub fn invalidate(&self, key: &K) {
        self.inner.remove(key);
    }

    /// Removes all entries.
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    /// Runs pending maintenance now: expires due entries and enforces the
    /// size bound.
    pub fn clean_up(&self) {
        self.inner.clean_up();
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// `true` if `key` maps to a live entry.  Does not count as an access.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.peek(key).is_some()
    }

    /// Number of mapped entries, including expired ones not yet swept.
    pub fn estimated_size(&self) -> usize {
        self.inner.estimated_size()
    }

    pub fn stats(&self) -> Metrics {
        self.inner.metrics.snapshot()
    }

    /// Inspection of expiration metadata and in-flight refreshes.
    pub fn policy(&self) -> Inspector<K, V> {
        Inspector::new(Arc::clone(&self.inner))
    }
}

// ---------------------------------------------------------------------------
// LoadingCache
// ---------------------------------------------------------------------------

/// A [`Cache`] that computes missing values with a [`CacheLoader`].
///
/// Dereferences to [`Cache`] for everything that does not load.
pub struct LoadingCache<K, V> {
    cache: Cache<K, V>,
    loader: Arc<dyn CacheLoader<K, V>>,
}

impl<K, V> Clone for LoadingCache<K, V> {
    fn clone(&self) -> Self {
        LoadingCache {
            cache: self.cache.clone(),
            loader: Arc::clone(&self.loader),
        }
    }
}

impl<K, V> Deref for LoadingCache<K, V> {
    type Target = Cache<K, V>;

    fn deref(&self) -> &Cache<K, V> {
        &self.cache
    }
}

impl<K, V> LoadingCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn new(cache: Cache<K, V>, loader: Arc<dyn CacheLoader<K, V>>) -> Self {
        LoadingCache { cache, loader }
    }

    /// Returns the value for `key`, loading it if absent.
    pub fn get(&self, key: &K) -> Result<Option<Arc<V>>, CacheError> {
        self.cache.try_get_with(key.clone(), |k| self.loader.load(k))
    }

    /// Returns the values for `keys` in the order given, bulk-loading the
    /// misses.
    pub fn get_all<I>(&self, keys: I) -> Result<IndexMap<K, Arc<V>>, CacheError>
    where
        I: IntoIterator<Item = K>,
    {
        self.cache.get_all(keys, |missing| load_all_or_each(&*self.loader, missing))
    }

    /// Reloads `key` on the executor.  The current value stays visible until
    /// the reload completes; a failed reload keeps it.
    ///
    /// Returns the in-flight refresh if one is already running for `key`.
    pub fn refresh(&self, key: K) -> ValueFuture<V> {
        let loader = Arc::clone(&self.loader);
        let executor = Arc::clone(&self.cache.inner.executor);
        self.cache.inner.refresh(key, move |key, old_value| {
            let key = key.clone();
            ValueFuture::supply(&*executor, move || match old_value {
                Some(old_value) => loader.reload(&key, old_value),
                None => loader.load(&key),
            })
        })
    }

    /// Refreshes every key.  The combined future fails if any refresh fails.
    pub fn refresh_all<I>(&self, keys: I) -> ValueFuture<HashMap<K, Arc<V>>>
    where
        I: IntoIterator<Item = K>,
    {
        let parts = keys
            .into_iter()
            .map(|key| {
                let future = self.refresh(key.clone());
                (key, future)
            })
            .collect();
        collect_keyed(parts)
    }
}
