use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use crate::async_cache::{AsyncCache, AsyncLoadingCache};
use crate::cache::{Config, Inner};
use crate::executor::{Executor, SameThreadExecutor};
use crate::expiry::{ExpirationPolicy, Expiry};
use crate::listener::{FnListener, RemovalCause, RemovalListener};
use crate::loader::{AsyncCacheLoader, CacheLoader};
use crate::refresh::ConsistencyMode;
use crate::scheduler::Scheduler;
use crate::sync::{Cache, LoadingCache};
use crate::ticker::{SystemTicker, Ticker};
use crate::weigher::{UnitWeigher, Weigher};

/// Builder for configuring and constructing every cache flavour.
///
/// # Example
/// ```
/// use lungo::{CacheBuilder, ThreadExecutor};
/// use std::time::Duration;
///
/// let cache: lungo::Cache<String, String> = CacheBuilder::new(1_000)
///     .expire_after_write(Duration::from_secs(60))
///     .expire_after_access(Duration::from_secs(10))
///     .executor(ThreadExecutor::named("cache-loader"))
///     .build();
/// ```
pub struct CacheBuilder<K, V> {
    max_capacity: u64,
    num_shards: usize,
    weigher: Box<dyn Weigher<K, V>>,
    after_write: Option<Duration>,
    after_access: Option<Duration>,
    variable: Option<Box<dyn Expiry<K, V>>>,
    listener: Option<Box<dyn RemovalListener<K, V>>>,
    ticker: Arc<dyn Ticker>,
    executor: Arc<dyn Executor>,
    scheduler: Option<Arc<dyn Scheduler>>,
    consistency: ConsistencyMode,
}

impl<K: 'static, V: 'static> CacheBuilder<K, V> {
    pub fn new(max_capacity: u64) -> Self {
        assert!(max_capacity > 0, "max_capacity must be greater than 0");
        CacheBuilder {
            max_capacity,
            num_shards: 64,
            weigher: Box::new(UnitWeigher),
            after_write: None,
            after_access: None,
            variable: None,
            listener: None,
            ticker: Arc::new(SystemTicker::new()),
            executor: Arc::new(SameThreadExecutor),
            scheduler: None,
            consistency: ConsistencyMode::default(),
        }
    }

    /// Set the number of internal shards (must be a power of two; default: 64).
    pub fn num_shards(mut self, n: usize) -> Self {
        assert!(n > 0 && n.is_power_of_two(), "num_shards must be a power of two");
        self.num_shards = n;
        self
    }

    /// Each entry expires `ttl` after it was **written** (or replaced).
    pub fn expire_after_write(mut self, ttl: Duration) -> Self {
        self.after_write = Some(ttl);
        self
    }

    /// Each entry expires `tti` after it was **last read or written**.
    pub fn expire_after_access(mut self, tti: Duration) -> Self {
        self.after_access = Some(tti);
        self
    }

    /// Per-entry expiration computed by `expiry`.  Combines with the fixed
    /// policies: an entry expires at the earliest configured deadline.
    pub fn expire_after<E: Expiry<K, V>>(mut self, expiry: E) -> Self {
        self.variable = Some(Box::new(expiry));
        self
    }

    /// The time source for every timestamp (default: [`SystemTicker`]).
    pub fn ticker<T: Ticker>(mut self, ticker: T) -> Self {
        self.ticker = Arc::new(ticker);
        self
    }

    /// Where asynchronous loads, refreshes and scheduled maintenance run
    /// (default: [`SameThreadExecutor`]).
    pub fn executor<E: Executor>(mut self, executor: E) -> Self {
        self.executor = Arc::new(executor);
        self
    }

    /// Enables timely expiration by waking the cache up for the earliest
    /// deadline.  Without a scheduler, expired entries are swept when the
    /// cache is touched.
    pub fn scheduler<S: Scheduler>(mut self, scheduler: S) -> Self {
        self.scheduler = Some(Arc::new(scheduler));
        self
    }

    /// How a completing refresh treats concurrent writes
    /// (default: [`ConsistencyMode::Linearizable`]).
    pub fn consistency(mut self, mode: ConsistencyMode) -> Self {
        self.consistency = mode;
        self
    }

    /// Register a removal listener closure.
    ///
    /// The closure runs synchronously on the thread that removed the entry.
    /// Do **not** call cache methods from within the closure.
    pub fn removal_listener<F>(mut self, f: F) -> Self
    where
        F: Fn(&K, Arc<V>, RemovalCause) + Send + Sync + 'static,
    {
        self.listener = Some(Box::new(FnListener(f)));
        self
    }

    /// Register a removal listener via the [`RemovalListener`] trait.
    pub fn removal_listener_impl<L: RemovalListener<K, V>>(mut self, l: L) -> Self {
        self.listener = Some(Box::new(l));
        self
    }

    /// Weigh values with `weigher` (a closure or a [`Weigher`] type).
    pub fn weigher<W: Weigher<K, V>>(mut self, weigher: W) -> Self {
        self.weigher = Box::new(weigher);
        self
    }
}

impl<K, V> CacheBuilder<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn into_inner(self) -> Arc<Inner<K, V>> {
        tracing::debug!(
            max_capacity = self.max_capacity,
            num_shards = self.num_shards,
            scheduled = self.scheduler.is_some(),
            consistency = ?self.consistency,
            "building cache"
        );
        Arc::new(Inner::new(Config {
            max_capacity: self.max_capacity,
            num_shards: self.num_shards,
            weigher: self.weigher,
            expiration: ExpirationPolicy::new(self.after_write, self.after_access, self.variable),
            listener: self.listener,
            ticker: self.ticker,
            executor: self.executor,
            scheduler: self.scheduler,
            consistency: self.consistency,
        }))
    }

    pub fn build(self) -> Cache<K, V> {
        Cache {
            inner: self.into_inner(),
        }
    }

    pub fn build_with_loader<L: CacheLoader<K, V>>(self, loader: L) -> LoadingCache<K, V> {
        LoadingCache::new(self.build(), Arc::new(loader))
    }

    pub fn build_async(self) -> AsyncCache<K, V> {
        AsyncCache::new(self.into_inner())
    }

    pub fn build_async_with_loader<L: AsyncCacheLoader<K, V>>(self, loader: L) -> AsyncLoadingCache<K, V> {
        AsyncLoadingCache::new(self.build_async(), Arc::new(loader))
    }
}
