//! Cache handles whose values are [`ValueFuture`]s.
//!
//! A computation in flight is stored like any other value, so every caller
//! asking for the same key gets the very same future and only one
//! computation ever runs.  A future that completes without a value (or with
//! an error, or cancelled) silently drops its mapping.
//!
//! # Example
//! ```
//! use lungo::{CacheBuilder, ValueFuture};
//!
//! let cache: lungo::AsyncCache<u32, String> = CacheBuilder::new(100).build_async();
//! let first = cache.get_with(1, |key| Ok(Some(format!("value-{key}"))));
//! let second = cache.get_with(1, |_| unreachable!("single flight"));
//! assert!(ValueFuture::ptr_eq(&first, &second));
//! assert_eq!(*first.join().unwrap().unwrap(), "value-1");
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::future::BoxFuture;
use indexmap::IndexMap;

use crate::cache::{Claim, Inner, Write};
use crate::error::{BoxError, CacheError};
use crate::executor::Executor;
use crate::future::{collect_keyed, ValueFuture};
use crate::inspect::Inspector;
use crate::listener::RemovalCause;
use crate::loader::{async_load_all_or_each, share_values, AsyncCacheLoader};
use crate::metrics::stats::Metrics;
use crate::sync::Cache;

// ---------------------------------------------------------------------------
// AsyncCache
// ---------------------------------------------------------------------------

/// A cache of [`ValueFuture`]s with single-flight computation.
pub struct AsyncCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for AsyncCache<K, V> {
    fn clone(&self) -> Self {
        AsyncCache {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> AsyncCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn new(inner: Arc<Inner<K, V>>) -> Self {
        AsyncCache { inner }
    }

    /// Returns the future stored for `key`, completed or not.
    pub fn get_if_present(&self, key: &K) -> Option<ValueFuture<V>> {
        match self.inner.lookup(key, false) {
            Ok(Some(entry)) => {
                self.inner.metrics.record_hit();
                Some(entry.value().clone())
            }
            _ => {
                self.inner.metrics.record_miss();
                None
            }
        }
    }

    /// Returns the future for `key`, running `f` on the executor if absent.
    pub fn get_with<F>(&self, key: K, f: F) -> ValueFuture<V>
    where
        F: FnOnce(&K) -> Result<Option<V>, BoxError> + Send + 'static,
    {
        match self.inner.get_or_insert_pending(&key) {
            Ok(Claim::Hit(future)) => future,
            Ok(Claim::Miss(entry)) => {
                let future = entry.value().clone();
                let inner = Arc::clone(&self.inner);
                self.inner.executor.execute(Box::new(move || {
                    let _ = inner.load_pending(&entry, || f(entry.key()));
                }));
                future
            }
            Err(err) => ValueFuture::failed(err),
        }
    }

    /// Returns the future for `key`, starting the future returned by `f` if
    /// absent.  The stored future mirrors the one `f` returns.
    pub fn get_with_async<F>(&self, key: K, f: F) -> ValueFuture<V>
    where
        F: FnOnce(&K, &Arc<dyn Executor>) -> ValueFuture<V>,
    {
        match self.inner.get_or_insert_pending(&key) {
            Ok(Claim::Hit(future)) => future,
            Ok(Claim::Miss(entry)) => {
                let future = entry.value().clone();
                let source = match panic::catch_unwind(AssertUnwindSafe(|| f(&key, &self.inner.executor))) {
                    Ok(source) => source,
                    Err(payload) => {
                        self.inner.finish_pending(&entry, Err(CacheError::load("computation panicked")));
                        panic::resume_unwind(payload)
                    }
                };
                let cache = Arc::downgrade(&self.inner);
                source.on_complete(move |outcome| match cache.upgrade() {
                    Some(inner) => {
                        inner.record_load(outcome);
                        inner.finish_pending(&entry, outcome.clone());
                    }
                    None => {
                        entry.value().complete_with(outcome.clone());
                    }
                });
                future
            }
            Err(err) => ValueFuture::failed(err),
        }
    }

    /// Resolves `keys` in the order given, loading the misses with one call
    /// to `f` on the executor.
    pub fn get_all<I, F>(&self, keys: I, f: F) -> BoxFuture<'static, Result<IndexMap<K, Arc<V>>, CacheError>>
    where
        I: IntoIterator<Item = K>,
        F: FnOnce(&[K]) -> Result<HashMap<K, V>, BoxError> + Send + 'static,
    {
        let executor = Arc::clone(&self.inner.executor);
        self.inner.get_all(keys, move |missing| {
            ValueFuture::supply(&*executor, move || f(&missing).map(|loaded| Some(share_values(loaded))))
        })
    }

    /// Stores `value` for `key` and returns the future it replaced.
    ///
    /// A completed value is checked against the variable expiry policy right
    /// away; a pending one when it completes.
    pub fn put(&self, key: K, value: ValueFuture<V>) -> Result<Option<ValueFuture<V>>, CacheError> {
        let computed = self.inner.put(&key, value)?;
        Ok(computed.previous.map(|entry| entry.value().clone()))
    }

    /// Replaces the future of a present key, returning the previous one.
    pub fn replace(&self, key: K, value: ValueFuture<V>) -> Result<Option<ValueFuture<V>>, CacheError> {
        let computed = self.inner.compute(&key, |live| match live {
            Some(_) => Write::Insert(value),
            None => Write::Keep,
        })?;
        Ok(computed.previous.map(|entry| entry.value().clone()))
    }

    /// Replaces the future of `key` only if it is still `expected`.
    pub fn replace_if(&self, key: K, expected: &ValueFuture<V>, value: ValueFuture<V>) -> Result<bool, CacheError> {
        let mut replaced = false;
        self.inner.compute(&key, |live| match live {
            Some(entry) if ValueFuture::ptr_eq(entry.value(), expected) => {
                replaced = true;
                Write::Insert(value)
            }
            _ => Write::Keep,
        })?;
        Ok(replaced)
    }

    /// Removes `key`, returning its future.
    pub fn remove(&self, key: &K) -> Option<ValueFuture<V>> {
        self.inner.remove(key).map(|entry| entry.value().clone())
    }

    /// Removes `key` only if it still maps to `expected`.
    pub fn remove_if(&self, key: &K, expected: &ValueFuture<V>) -> bool {
        let mut removed = false;
        let _ = self.inner.compute(key, |live| match live {
            Some(entry) if ValueFuture::ptr_eq(entry.value(), expected) => {
                removed = true;
                Write::Remove(RemovalCause::Explicit)
            }
            _ => Write::Keep,
        });
        if removed {
            self.inner.refreshes.discard(key);
        }
        removed
    }

    /// Stores the future returned by `f` if `key` is absent.  `f` runs under
    /// the key's lock and must not touch the cache.
    ///
    /// Returns the future now mapped, if any.
    pub fn compute_if_absent<F>(&self, key: K, f: F) -> Result<Option<ValueFuture<V>>, CacheError>
    where
        F: FnOnce(&K) -> Option<ValueFuture<V>>,
    {
        let computed = self.inner.compute(&key, |live| match live {
            Some(_) => Write::Keep,
            None => f(&key).map_or(Write::Keep, Write::Insert),
        })?;
        Ok(computed.current.map(|entry| entry.value().clone()))
    }

    /// `true` if `key` maps to a live entry, completed or not.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.peek(key).is_some()
    }

    pub fn invalidate(&self, key: &K) {
        self.inner.remove(key);
    }

    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    pub fn clean_up(&self) {
        self.inner.clean_up();
    }

    pub fn estimated_size(&self) -> usize {
        self.inner.estimated_size()
    }

    pub fn stats(&self) -> Metrics {
        self.inner.metrics.snapshot()
    }

    pub fn policy(&self) -> Inspector<K, V> {
        Inspector::new(Arc::clone(&self.inner))
    }

    /// A blocking view over the same storage.
    pub fn synchronous(&self) -> Cache<K, V> {
        Cache {
            inner: Arc::clone(&self.inner),
        }
    }
}

// ---------------------------------------------------------------------------
// AsyncLoadingCache
// ---------------------------------------------------------------------------

/// An [`AsyncCache`] that computes missing values with an
/// [`AsyncCacheLoader`].
pub struct AsyncLoadingCache<K, V> {
    cache: AsyncCache<K, V>,
    loader: Arc<dyn AsyncCacheLoader<K, V>>,
}

impl<K, V> Clone for AsyncLoadingCache<K, V> {
    fn clone(&self) -> Self {
        AsyncLoadingCache {
            cache: self.cache.clone(),
            loader: Arc::clone(&self.loader),
        }
    }
}

impl<K, V> Deref for AsyncLoadingCache<K, V> {
    type Target = AsyncCache<K, V>;

    fn deref(&self) -> &AsyncCache<K, V> {
        &self.cache
    }
}

impl<K, V> AsyncLoadingCache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn new(cache: AsyncCache<K, V>, loader: Arc<dyn AsyncCacheLoader<K, V>>) -> Self {
        AsyncLoadingCache { cache, loader }
    }

    /// Returns the future for `key`, loading it if absent.
    pub fn get(&self, key: &K) -> ValueFuture<V> {
        self.cache
            .get_with_async(key.clone(), |k, executor| self.loader.async_load(k, executor))
    }

    /// Resolves `keys` in the order given, bulk-loading the misses.
    pub fn get_all<I>(&self, keys: I) -> BoxFuture<'static, Result<IndexMap<K, Arc<V>>, CacheError>>
    where
        I: IntoIterator<Item = K>,
    {
        let executor = &self.cache.inner.executor;
        self.cache
            .inner
            .get_all(keys, |missing| async_load_all_or_each(&*self.loader, missing, executor))
    }

    /// Reloads `key` in the background; see
    /// [`LoadingCache::refresh`](crate::LoadingCache::refresh).
    pub fn refresh(&self, key: K) -> ValueFuture<V> {
        let loader = Arc::clone(&self.loader);
        let executor = Arc::clone(&self.cache.inner.executor);
        self.cache.inner.refresh(key, move |key, old_value| match old_value {
            Some(old_value) => loader.async_reload(key, old_value, &executor),
            None => loader.async_load(key, &executor),
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
