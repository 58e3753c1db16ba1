//! Value loaders used by the loading caches.
//!
//! A [`CacheLoader`] computes values on the calling thread (or on the
//! executor, for refreshes).  An [`AsyncCacheLoader`] returns
//! [`ValueFuture`]s and decides itself where the work happens.  [`Blocking`]
//! adapts the former to the latter by running each call on the cache's
//! executor.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use crate::error::{BoxError, CacheError};
use crate::executor::Executor;
use crate::future::{collect_keyed, ValueFuture};

/// Computes values for keys that are missing or being refreshed.
///
/// `Ok(None)` means "no value": nothing is cached and waiters see `None`.
pub trait CacheLoader<K, V>: Send + Sync + 'static {
    fn load(&self, key: &K) -> Result<Option<V>, BoxError>;

    /// Loads several keys in one call.
    ///
    /// The returned map may omit keys (they are absent) and may contain extra
    /// keys (they are cached too).  The default reports
    /// [`CacheError::BulkUnsupported`], which makes the cache fall back to
    /// one [`load`](CacheLoader::load) per key.
    fn load_all(&self, keys: &[K]) -> Result<HashMap<K, V>, BoxError> {
        let _ = keys;
        Err(Box::new(CacheError::BulkUnsupported))
    }

    /// Recomputes the value of a key that is already cached.  Defaults to
    /// [`load`](CacheLoader::load).
    fn reload(&self, key: &K, old_value: Arc<V>) -> Result<Option<V>, BoxError> {
        let _ = old_value;
        self.load(key)
    }
}

/// The asynchronous counterpart of [`CacheLoader`].
pub trait AsyncCacheLoader<K, V>: Send + Sync + 'static {
    fn async_load(&self, key: &K, executor: &Arc<dyn Executor>) -> ValueFuture<V>;

    /// Defaults to a future failed with [`CacheError::BulkUnsupported`], which
    /// makes the cache call [`async_load`](AsyncCacheLoader::async_load) per
    /// key instead.
    fn async_load_all(&self, keys: &[K], executor: &Arc<dyn Executor>) -> ValueFuture<HashMap<K, Arc<V>>> {
        let _ = (keys, executor);
        ValueFuture::failed(CacheError::BulkUnsupported)
    }

    fn async_reload(&self, key: &K, old_value: Arc<V>, executor: &Arc<dyn Executor>) -> ValueFuture<V> {
        let _ = old_value;
        self.async_load(key, executor)
    }
}

// ---------------------------------------------------------------------------
// Adapters
// ---------------------------------------------------------------------------

/// A [`CacheLoader`] backed by a closure.
pub struct FnLoader<F>(F);

impl<F> FnLoader<F> {
    pub fn new<K, V>(f: F) -> Self
    where
        F: Fn(&K) -> Result<Option<V>, BoxError> + Send + Sync + 'static,
    {
        FnLoader(f)
    }
}

impl<K, V, F> CacheLoader<K, V> for FnLoader<F>
where
    F: Fn(&K) -> Result<Option<V>, BoxError> + Send + Sync + 'static,
{
    fn load(&self, key: &K) -> Result<Option<V>, BoxError> {
        (self.0)(key)
    }
}

/// Runs a blocking [`CacheLoader`] on the cache's executor.
pub struct Blocking<L> {
    loader: Arc<L>,
}

impl<L> Blocking<L> {
    pub fn new(loader: L) -> Self {
        Blocking {
            loader: Arc::new(loader),
        }
    }
}

impl<K, V, L> AsyncCacheLoader<K, V> for Blocking<L>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    L: CacheLoader<K, V>,
{
    fn async_load(&self, key: &K, executor: &Arc<dyn Executor>) -> ValueFuture<V> {
        let loader = Arc::clone(&self.loader);
        let key = key.clone();
        ValueFuture::supply(&**executor, move || loader.load(&key))
    }

    fn async_load_all(&self, keys: &[K], executor: &Arc<dyn Executor>) -> ValueFuture<HashMap<K, Arc<V>>> {
        let loader = Arc::clone(&self.loader);
        let keys = keys.to_vec();
        ValueFuture::supply(&**executor, move || {
            load_all_or_each(&*loader, &keys).map(|loaded| Some(share_values(loaded)))
        })
    }

    fn async_reload(&self, key: &K, old_value: Arc<V>, executor: &Arc<dyn Executor>) -> ValueFuture<V> {
        let loader = Arc::clone(&self.loader);
        let key = key.clone();
        ValueFuture::supply(&**executor, move || loader.reload(&key, old_value))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_bulk_unsupported(err: &BoxError) -> bool {
    matches!(err.downcast_ref::<CacheError>(), Some(CacheError::BulkUnsupported))
}

/// Bulk-loads `keys`, falling back to one load per key when the loader has
/// no bulk form.
pub(crate) fn load_all_or_each<K, V, L>(loader: &L, keys: &[K]) -> Result<HashMap<K, V>, BoxError>
where
    K: Hash + Eq + Clone,
    L: CacheLoader<K, V> + ?Sized,
{
    match loader.load_all(keys) {
        Err(err) if is_bulk_unsupported(&err) => {
            let mut loaded = HashMap::with_capacity(keys.len());
            for key in keys {
                if let Some(value) = loader.load(key)? {
                    loaded.insert(key.clone(), value);
                }
            }
            Ok(loaded)
        }
        other => other,
    }
}

/// Same as [`load_all_or_each`] for asynchronous loaders.
pub(crate) fn async_load_all_or_each<K, V, L>(
    loader: &L,
    keys: Vec<K>,
    executor: &Arc<dyn Executor>,
) -> ValueFuture<HashMap<K, Arc<V>>>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    L: AsyncCacheLoader<K, V> + ?Sized,
{
    let bulk = loader.async_load_all(&keys, executor);
    if !matches!(bulk.peek(), Some(Err(CacheError::BulkUnsupported))) {
        return bulk;
    }
    let parts = keys
        .into_iter()
        .map(|key| {
            let future = loader.async_load(&key, executor);
            (key, future)
        })
        .collect();
    collect_keyed(parts)
}

pub(crate) fn share_values<K: Hash + Eq, V>(values: HashMap<K, V>) -> HashMap<K, Arc<V>> {
    values.into_iter().map(|(k, v)| (k, Arc::new(v))).collect()
}

/// Wraps the result of a blocking bulk load as a completed future.
pub(crate) fn completed_bulk<K: Hash + Eq, V>(
    result: Result<HashMap<K, V>, BoxError>,
) -> ValueFuture<HashMap<K, Arc<V>>> {
    ValueFuture::from_outcome(
        result
            .map(|loaded| Some(Arc::new(share_values(loaded))))
            .map_err(CacheError::load),
    )
}
