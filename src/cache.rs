//! The engine shared by every cache handle.
//!
//! All handles ([`Cache`](crate::Cache), [`AsyncCache`](crate::AsyncCache)
//! and their loading variants) wrap one `Arc<Inner>`.  Every mutation goes
//! through [`Inner::compute`], which runs under the key's shard lock; the
//! timer wheel and size policy are only touched by the maintenance pass,
//! which is fed through the read and write buffers.
//!
//! Lock order is maintenance → shard.  Nothing acquires the maintenance lock
//! while holding a shard lock.

use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;

use crate::buffer::read::ReadBuffer;
use crate::buffer::write::{WriteBuffer, WriteOp};
use crate::error::{BoxError, CacheError};
use crate::executor::{Executor, Task};
use crate::expiry::pacer::Pacer;
use crate::expiry::timer_wheel::TimerWheel;
use crate::expiry::ExpirationPolicy;
use crate::future::{Outcome, ValueFuture};
use crate::listener::{RemovalCause, RemovalListener};
use crate::metrics::stats::StatsCounter;
use crate::policy::lru::LruPolicy;
use crate::policy::Policy;
use crate::refresh::{ConsistencyMode, Refreshes};
use crate::scheduler::Scheduler;
use crate::store::entry::{Entry, EntryRef, NIL};
use crate::store::sharded::{is_mapped, ShardMap, ShardedStore};
use crate::ticker::Ticker;
use crate::weigher::{weight_of, Weigher};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Everything the builder resolved.
pub(crate) struct Config<K, V> {
    pub(crate) max_capacity: u64,
    pub(crate) num_shards: usize,
    pub(crate) weigher: Box<dyn Weigher<K, V>>,
    pub(crate) expiration: ExpirationPolicy<K, V>,
    pub(crate) listener: Option<Box<dyn RemovalListener<K, V>>>,
    pub(crate) ticker: Arc<dyn Ticker>,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) scheduler: Option<Arc<dyn Scheduler>>,
    pub(crate) consistency: ConsistencyMode,
}

// ---------------------------------------------------------------------------
// Write decisions
// ---------------------------------------------------------------------------

/// What a [`Inner::compute`] closure wants done with the key.
pub(crate) enum Write<V> {
    Keep,
    Insert(ValueFuture<V>),
    Remove(RemovalCause),
}

/// The live entry a compute saw and the entry mapped after it.
pub(crate) struct Computed<K, V> {
    pub(crate) previous: Option<EntryRef<K, V>>,
    pub(crate) current: Option<EntryRef<K, V>>,
}

/// Result of a single-flight lookup.
pub(crate) enum Claim<K, V> {
    /// Someone else's value or computation.
    Hit(ValueFuture<V>),
    /// A pending entry the caller must complete via [`Inner::complete_pending`].
    Miss(EntryRef<K, V>),
}

// ---------------------------------------------------------------------------
// Inner
// ---------------------------------------------------------------------------

/// State owned by the maintenance lock.
struct Housekeeper<K, V> {
    wheel: TimerWheel<EntryRef<K, V>>,
    policy: LruPolicy<EntryRef<K, V>>,
    pacer: Option<Pacer>,
}

pub(crate) struct Inner<K, V> {
    store: ShardedStore<K, V>,
    housekeeper: Mutex<Housekeeper<K, V>>,
    /// Set by writers that could not take the maintenance lock; whoever
    /// holds it runs another pass before leaving.
    drain_requested: AtomicBool,
    read_buf: ReadBuffer<EntryRef<K, V>>,
    write_buf: WriteBuffer<K, V>,
    pub(crate) expiration: ExpirationPolicy<K, V>,
    weigher: Box<dyn Weigher<K, V>>,
    listener: Option<Box<dyn RemovalListener<K, V>>>,
    pub(crate) ticker: Arc<dyn Ticker>,
    pub(crate) executor: Arc<dyn Executor>,
    pub(crate) metrics: StatsCounter,
    generations: AtomicU64,
    pub(crate) refreshes: Refreshes<K, V>,
    pub(crate) consistency: ConsistencyMode,
}

impl<K, V> Inner<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub(crate) fn new(config: Config<K, V>) -> Self {
        let now = config.ticker.read();
        let pacer = config
            .scheduler
            .map(|scheduler| Pacer::new(scheduler, Arc::clone(&config.executor)));
        Inner {
            store: ShardedStore::new(config.num_shards),
            housekeeper: Mutex::new(Housekeeper {
                wheel: TimerWheel::new(now),
                policy: LruPolicy::new(config.max_capacity),
                pacer,
            }),
            drain_requested: AtomicBool::new(false),
            read_buf: ReadBuffer::new(),
            write_buf: WriteBuffer::new(),
            expiration: config.expiration,
            weigher: config.weigher,
            listener: config.listener,
            ticker: config.ticker,
            executor: config.executor,
            metrics: StatsCounter::new(),
            generations: AtomicU64::new(1),
            refreshes: Refreshes::new(),
            consistency: config.consistency,
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Returns the live entry for `key`, recording the access.
    ///
    /// An expired entry is evicted on the spot and reported as absent.  A
    /// failing `expire_after_read` is returned when `strict`; otherwise it is
    /// logged and the entry keeps its previous deadline.
    pub(crate) fn lookup(self: &Arc<Self>, key: &K, strict: bool) -> Result<Option<EntryRef<K, V>>, CacheError> {
        let Some(entry) = self.store.get(key) else {
            return Ok(None);
        };
        let now = self.ticker.read();
        if self.expiration.is_expired(&entry, now) {
            if self.evict_entry(&entry, RemovalCause::Expired, now) {
                self.push_write(WriteOp::Remove(entry));
            }
            return Ok(None);
        }
        if entry.is_ready() {
            if let Some(value) = entry.value().peek_value() {
                if let Err(err) = self.expiration.record_read(&entry, &value, now) {
                    if strict {
                        return Err(err);
                    }
                    tracing::warn!(error = %err, "expiry policy failed on read; keeping the previous deadline");
                }
            }
            if !self.read_buf.offer(Arc::clone(&entry)) {
                self.try_maintain();
            }
        }
        Ok(Some(entry))
    }

    /// Returns the live entry for `key` without touching its timestamps.
    pub(crate) fn peek(&self, key: &K) -> Option<EntryRef<K, V>> {
        self.store
            .get(key)
            .filter(|entry| !self.expiration.is_expired(entry, self.ticker.read()))
    }

    /// Every live entry with a value.
    pub(crate) fn snapshot(&self) -> Vec<(K, Arc<V>)> {
        let now = self.ticker.read();
        self.store
            .snapshot()
            .into_iter()
            .filter(|entry| entry.is_ready() && !self.expiration.is_expired(entry, now))
            .filter_map(|entry| entry.value().peek_value().map(|v| (entry.key().clone(), v)))
            .collect()
    }

    /// Mapped entries, including expired ones not yet swept.
    pub(crate) fn estimated_size(&self) -> usize {
        self.store.len()
    }

    pub(crate) fn weighted_size(&self) -> u64 {
        self.housekeeper.lock().policy.current_weight()
    }

    pub(crate) fn max_capacity(&self) -> u64 {
        self.housekeeper.lock().policy.max_weight()
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Runs `f` against the key's live entry under the shard lock and applies
    /// its decision.
    ///
    /// An expired entry is evicted first and `f` sees the key as absent.  A
    /// replaced value is reported as `Replaced` unless it is the very same
    /// `Arc`.  If the variable expiry policy rejects an inserted value the
    /// mapping is left as it was and the error is returned.
    pub(crate) fn compute<F>(self: &Arc<Self>, key: &K, f: F) -> Result<Computed<K, V>, CacheError>
    where
        F: FnOnce(Option<&EntryRef<K, V>>) -> Write<V>,
    {
        let mut retired: Vec<EntryRef<K, V>> = Vec::new();
        let result = self.store.compute(key, |map| {
            let live = match map.get(key).cloned() {
                Some(entry) if self.expiration.is_expired(&entry, self.ticker.read()) => {
                    self.retire(map, &entry, RemovalCause::Expired, true);
                    retired.push(entry);
                    None
                }
                other => other,
            };

            match f(live.as_ref()) {
                Write::Keep => Ok(Computed {
                    current: live.clone(),
                    previous: live,
                }),
                Write::Remove(cause) => {
                    if let Some(entry) = &live {
                        self.retire(map, entry, cause, true);
                        retired.push(Arc::clone(entry));
                    }
                    Ok(Computed {
                        previous: live,
                        current: None,
                    })
                }
                Write::Insert(value) => {
                    let entry = self.new_entry(key, value, live.as_deref())?;
                    if let Some(old) = &live {
                        let notify = !same_value(old.value(), entry.value());
                        self.retire(map, old, RemovalCause::Replaced, notify);
                        retired.push(Arc::clone(old));
                    }
                    map.insert(key.clone(), Arc::clone(&entry));
                    Ok(Computed {
                        previous: live,
                        current: Some(entry),
                    })
                }
            }
        });

        for entry in retired {
            self.push_write(WriteOp::Remove(entry));
        }
        let computed = result?;
        if let Some(entry) = &computed.current {
            let fresh = computed
                .previous
                .as_ref()
                .map_or(true, |previous| !Arc::ptr_eq(previous, entry));
            if fresh {
                if entry.is_ready() {
                    self.push_write(WriteOp::Add(Arc::clone(entry)));
                } else {
                    self.watch_pending(entry);
                }
            }
        }
        self.try_maintain();
        Ok(computed)
    }

    fn new_entry(
        &self,
        key: &K,
        value: ValueFuture<V>,
        previous: Option<&Entry<K, V>>,
    ) -> Result<EntryRef<K, V>, CacheError> {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let now = self.ticker.read();
        let entry = match value.peek_value() {
            Some(v) => {
                let variable_time = self.expiration.variable_on_write(key, &*v, now, previous)?;
                let weight = weight_of(&*self.weigher, key, &*v);
                Entry::ready(key.clone(), value, generation, now, variable_time, weight)
            }
            None => Entry::pending(key.clone(), value, generation, now),
        };
        Ok(Arc::new(entry))
    }

    pub(crate) fn put(self: &Arc<Self>, key: &K, value: ValueFuture<V>) -> Result<Computed<K, V>, CacheError> {
        self.compute(key, |_| Write::Insert(value))
    }

    /// Removes the key's live entry, returning it.
    pub(crate) fn remove(self: &Arc<Self>, key: &K) -> Option<EntryRef<K, V>> {
        self.refreshes.discard(key);
        self.compute(key, |live| match live {
            Some(_) => Write::Remove(RemovalCause::Explicit),
            None => Write::Keep,
        })
        .ok()
        .and_then(|computed| computed.previous)
    }

    pub(crate) fn invalidate_all(self: &Arc<Self>) {
        self.refreshes.discard_all();
        for entry in self.store.snapshot() {
            self.remove(entry.key());
        }
    }

    // -----------------------------------------------------------------------
    // Single-flight computation
    // -----------------------------------------------------------------------

    /// Returns the key's value or in-flight computation, or maps a new
    /// pending entry the caller is responsible for completing.
    pub(crate) fn get_or_insert_pending(self: &Arc<Self>, key: &K) -> Result<Claim<K, V>, CacheError> {
        if let Some(entry) = self.lookup(key, false)? {
            self.metrics.record_hit();
            return Ok(Claim::Hit(entry.value().clone()));
        }
        let mut found = None;
        let computed = self.compute(key, |live| match live {
            Some(entry) => {
                found = Some(entry.value().clone());
                Write::Keep
            }
            None => Write::Insert(ValueFuture::new()),
        })?;
        if let Some(future) = found {
            self.metrics.record_hit();
            return Ok(Claim::Hit(future));
        }
        self.metrics.record_miss();
        match computed.current {
            Some(entry) => Ok(Claim::Miss(entry)),
            None => Err(CacheError::Cancelled),
        }
    }

    /// Publishes the outcome of a pending entry this cache created.
    ///
    /// The entry is finalized before waiters wake, so a rejected expiry
    /// turns into the error every waiter sees.
    pub(crate) fn complete_pending(self: &Arc<Self>, entry: &EntryRef<K, V>, outcome: Outcome<V>) -> Outcome<V> {
        let outcome = match self.finalize(entry, &outcome) {
            Ok(()) => outcome,
            Err(err) => Err(err),
        };
        entry.value().complete_with(outcome.clone());
        outcome
    }

    /// [`complete_pending`](Inner::complete_pending) for callers that do not
    /// use the outcome; waiters see it through the entry's future.
    pub(crate) fn finish_pending(self: &Arc<Self>, entry: &EntryRef<K, V>, outcome: Outcome<V>) {
        let _ = self.complete_pending(entry, outcome);
    }

    /// Runs `f` for a pending entry this cache created and publishes its
    /// result.
    ///
    /// If `f` panics the entry fails before the panic resumes, so waiters are
    /// released and the key can be computed again.
    pub(crate) fn load_pending<F>(self: &Arc<Self>, entry: &EntryRef<K, V>, f: F) -> Outcome<V>
    where
        F: FnOnce() -> Result<Option<V>, BoxError>,
    {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => {
                let outcome = result.map(|v| v.map(Arc::new)).map_err(CacheError::load);
                self.record_load(&outcome);
                self.complete_pending(entry, outcome)
            }
            Err(payload) => {
                self.metrics.record_load_failure();
                self.finish_pending(entry, Err(CacheError::load("computation panicked")));
                panic::resume_unwind(payload)
            }
        }
    }

    pub(crate) fn record_load(&self, outcome: &Outcome<V>) {
        match outcome {
            Ok(Some(_)) => self.metrics.record_load_success(),
            _ => self.metrics.record_load_failure(),
        }
    }

    /// Finalizes a pending entry whenever its future completes, whoever
    /// completes it.
    fn watch_pending(self: &Arc<Self>, entry: &EntryRef<K, V>) {
        let cache = Arc::downgrade(self);
        let pending = Arc::downgrade(entry);
        entry.value().on_complete(move |outcome| {
            if let (Some(inner), Some(entry)) = (cache.upgrade(), pending.upgrade()) {
                if let Err(err) = inner.finalize(&entry, outcome) {
                    tracing::warn!(error = %err, "expiry policy rejected a completed value; discarding it");
                }
            }
        });
    }

    /// Turns a completed pending entry into a ready one, or drops its mapping
    /// silently if it completed without a value.  Idempotent.
    fn finalize(self: &Arc<Self>, entry: &EntryRef<K, V>, outcome: &Outcome<V>) -> Result<(), CacheError> {
        let mut op = None;
        let result = self.store.compute(entry.key(), |map| {
            if !entry.is_alive() {
                return Ok(());
            }
            match outcome {
                Ok(Some(value)) => {
                    if entry.is_ready() {
                        return Ok(());
                    }
                    let now = self.ticker.read();
                    match self.expiration.variable_on_write(entry.key(), &**value, now, None) {
                        Ok(variable_time) => {
                            let weight = weight_of(&*self.weigher, entry.key(), &**value);
                            entry.stamp(now, variable_time, weight);
                            op = Some(WriteOp::Add(Arc::clone(entry)));
                            Ok(())
                        }
                        Err(err) => {
                            op = discard(map, entry);
                            Err(err)
                        }
                    }
                }
                _ => {
                    op = discard(map, entry);
                    Ok(())
                }
            }
        });
        if let Some(op) = op {
            self.push_write(op);
            self.try_maintain();
        }
        result
    }

    // -----------------------------------------------------------------------
    // Bulk loading
    // -----------------------------------------------------------------------

    /// Resolves `keys` in caller order, loading every miss with one call to
    /// `bulk`.
    ///
    /// Duplicate keys are collapsed.  Keys whose value is absent are left out
    /// of the result; any failure fails the whole result.
    pub(crate) fn get_all<I, F>(
        self: &Arc<Self>,
        keys: I,
        bulk: F,
    ) -> BoxFuture<'static, Result<IndexMap<K, Arc<V>>, CacheError>>
    where
        I: IntoIterator<Item = K>,
        F: FnOnce(Vec<K>) -> ValueFuture<HashMap<K, Arc<V>>>,
    {
        let keys: IndexSet<K> = keys.into_iter().collect();
        let mut parts = Vec::with_capacity(keys.len());
        let mut proxies: IndexMap<K, EntryRef<K, V>> = IndexMap::new();
        for key in keys {
            match self.get_or_insert_pending(&key) {
                Ok(Claim::Hit(future)) => parts.push((key, future)),
                Ok(Claim::Miss(entry)) => {
                    parts.push((key.clone(), entry.value().clone()));
                    proxies.insert(key, entry);
                }
                Err(err) => {
                    for entry in proxies.values() {
                        self.finish_pending(entry, Err(err.clone()));
                    }
                    return Box::pin(future::ready(Err(err)));
                }
            }
        }

        if !proxies.is_empty() {
            let loaded = bulk(proxies.keys().cloned().collect());
            let cache = Arc::downgrade(self);
            loaded.on_complete(move |outcome| match cache.upgrade() {
                Some(inner) => inner.fill_proxies(proxies, outcome),
                None => {
                    for entry in proxies.values() {
                        entry.value().cancel();
                    }
                }
            });
        }

        Box::pin(async move {
            let mut result = IndexMap::with_capacity(parts.len());
            for (key, future) in parts {
                if let Some(value) = future.await? {
                    result.insert(key, value);
                }
            }
            Ok(result)
        })
    }

    fn fill_proxies(self: &Arc<Self>, proxies: IndexMap<K, EntryRef<K, V>>, outcome: &Outcome<HashMap<K, Arc<V>>>) {
        match outcome {
            Ok(loaded) => {
                self.metrics.record_load_success();
                let loaded = loaded.as_deref();
                for (key, entry) in &proxies {
                    let value = loaded.and_then(|map| map.get(key)).map(Arc::clone);
                    self.finish_pending(entry, Ok(value));
                }
                for (key, value) in loaded.into_iter().flatten() {
                    if proxies.contains_key(key) {
                        continue;
                    }
                    if let Err(err) = self.put(key, ValueFuture::ready(Arc::clone(value))) {
                        tracing::warn!(error = %err, "dropping an extra value from a bulk load");
                    }
                }
            }
            Err(err) => {
                self.metrics.record_load_failure();
                for entry in proxies.values() {
                    self.finish_pending(entry, Err(err.clone()));
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    /// Claims the removal of a mapped entry.  Must run under its shard lock.
    ///
    /// The winner unlinks the entry and notifies the listener once the value
    /// is known; an entry still computing is reported only if it completes
    /// with a value.
    fn retire(
        self: &Arc<Self>,
        map: &mut ShardMap<K, V>,
        entry: &EntryRef<K, V>,
        cause: RemovalCause,
        notify: bool,
    ) -> bool {
        if !entry.try_retire() {
            return false;
        }
        if is_mapped(map, entry) {
            map.remove(entry.key());
        }
        if cause.was_evicted() {
            self.metrics.record_eviction(entry.weight());
        }
        if notify && self.listener.is_some() {
            match entry.value().peek() {
                Some(Ok(Some(value))) => self.notify(entry.key(), value, cause),
                Some(_) => {}
                None => {
                    let cache = Arc::downgrade(self);
                    let key = entry.key().clone();
                    entry.value().on_complete(move |outcome| {
                        if let (Some(inner), Ok(Some(value))) = (cache.upgrade(), outcome) {
                            inner.notify(&key, Arc::clone(value), cause);
                        }
                    });
                }
            }
        }
        true
    }

    /// Evicts `entry` if it is still the mapped one (and, for `Expired`,
    /// still expired at `now`).
    fn evict_entry(self: &Arc<Self>, entry: &EntryRef<K, V>, cause: RemovalCause, now: u64) -> bool {
        self.store.compute(entry.key(), |map| {
            if !is_mapped(map, entry) {
                return false;
            }
            if cause == RemovalCause::Expired && !self.expiration.is_expired(entry, now) {
                return false;
            }
            self.retire(map, entry, cause, true)
        })
    }

    pub(crate) fn notify(&self, key: &K, value: Arc<V>, cause: RemovalCause) {
        if let Some(listener) = &self.listener {
            listener.on_removal(key, value, cause);
        }
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    fn push_write(self: &Arc<Self>, op: WriteOp<K, V>) {
        if let Err(op) = self.write_buf.push(op) {
            self.maintain_blocking(Some(op));
        }
    }

    /// Runs a maintenance pass unless another thread is already running one,
    /// in which case that thread runs one more pass before it lets go.
    pub(crate) fn try_maintain(self: &Arc<Self>) {
        self.drain_requested.store(true, Ordering::SeqCst);
        self.drain_requested_passes();
    }

    /// Runs a maintenance pass, waiting for the lock.
    pub(crate) fn clean_up(self: &Arc<Self>) {
        self.maintain_blocking(None);
    }

    fn maintain_blocking(self: &Arc<Self>, extra: Option<WriteOp<K, V>>) {
        {
            let mut housekeeper = self.housekeeper.lock();
            self.drain_requested.store(false, Ordering::SeqCst);
            self.maintain(&mut housekeeper, extra);
        }
        self.drain_requested_passes();
    }

    /// Keeps running passes while a writer asked for one.  A writer whose
    /// `try_lock` fails after our last check sees the lock free and runs the
    /// pass itself.
    fn drain_requested_passes(self: &Arc<Self>) {
        while self.drain_requested.load(Ordering::SeqCst) {
            let Some(mut housekeeper) = self.housekeeper.try_lock() else {
                return;
            };
            self.drain_requested.store(false, Ordering::SeqCst);
            self.maintain(&mut housekeeper, None);
        }
    }

    fn maintain(self: &Arc<Self>, hk: &mut Housekeeper<K, V>, extra: Option<WriteOp<K, V>>) {
        let mut writes = Vec::new();
        self.write_buf.drain(&mut writes);
        writes.extend(extra);
        for op in writes {
            self.apply_write(hk, op);
        }

        let mut reads = Vec::new();
        self.read_buf.drain(&mut reads);
        for entry in &reads {
            self.apply_read(hk, entry);
        }

        let now = self.ticker.read();
        let expired = self.expire_entries(hk, now);
        let evicted = self.evict_entries(hk, now);
        self.schedule_wake_up(hk, now);

        if expired > 0 || evicted > 0 {
            tracing::debug!(
                expired,
                evicted,
                weighted_size = hk.policy.current_weight(),
                "maintenance pass"
            );
        }
    }

    fn apply_write(&self, hk: &mut Housekeeper<K, V>, op: WriteOp<K, V>) {
        match op {
            WriteOp::Add(entry) => {
                if !entry.is_alive() || entry.policy() != NIL {
                    return;
                }
                entry.set_policy(hk.policy.on_insert(Arc::clone(&entry), entry.weight()));
                if let Some(deadline) = self.expiration.deadline(&entry) {
                    entry.set_timer(hk.wheel.schedule(Arc::clone(&entry), deadline));
                }
            }
            WriteOp::Remove(entry) => {
                if entry.timer() != NIL {
                    hk.wheel.cancel(entry.timer());
                    entry.set_timer(NIL);
                }
                if entry.policy() != NIL {
                    hk.policy.on_remove(entry.policy());
                    entry.set_policy(NIL);
                }
                entry.mark_dead();
            }
        }
    }

    fn apply_read(&self, hk: &mut Housekeeper<K, V>, entry: &EntryRef<K, V>) {
        if !entry.is_alive() || entry.policy() == NIL {
            return;
        }
        hk.policy.on_access(entry.policy());
        if self.expiration.tracks_access() {
            self.reschedule(hk, entry);
        }
    }

    /// Moves the entry's timer to its current deadline.
    fn reschedule(&self, hk: &mut Housekeeper<K, V>, entry: &EntryRef<K, V>) {
        match (self.expiration.deadline(entry), entry.timer()) {
            (Some(deadline), NIL) => entry.set_timer(hk.wheel.schedule(Arc::clone(entry), deadline)),
            (Some(deadline), timer) => {
                hk.wheel.reschedule(timer, deadline);
            }
            (None, NIL) => {}
            (None, timer) => {
                hk.wheel.cancel(timer);
                entry.set_timer(NIL);
            }
        }
    }

    fn expire_entries(self: &Arc<Self>, hk: &mut Housekeeper<K, V>, now: u64) -> usize {
        let mut expired = 0;
        for entry in hk.wheel.advance(now) {
            entry.set_timer(NIL);
            if !entry.is_alive() {
                continue;
            }
            if self.evict_entry(&entry, RemovalCause::Expired, now) {
                tracing::trace!(generation = entry.generation(), "entry expired");
                if entry.policy() != NIL {
                    hk.policy.on_remove(entry.policy());
                    entry.set_policy(NIL);
                }
                entry.mark_dead();
                expired += 1;
            } else if entry.is_alive() {
                // A read moved the deadline after the timer was set.
                self.reschedule(hk, &entry);
            }
        }
        expired
    }

    fn evict_entries(self: &Arc<Self>, hk: &mut Housekeeper<K, V>, now: u64) -> usize {
        let mut evicted = 0;
        while let Some(victim) = hk.policy.evict() {
            victim.set_policy(NIL);
            if victim.timer() != NIL {
                hk.wheel.cancel(victim.timer());
                victim.set_timer(NIL);
            }
            if self.evict_entry(&victim, RemovalCause::Size, now) {
                evicted += 1;
            }
            victim.mark_dead();
        }
        evicted
    }

    fn schedule_wake_up(self: &Arc<Self>, hk: &mut Housekeeper<K, V>, now: u64) {
        let next_deadline = hk.wheel.next_deadline();
        if let Some(pacer) = hk.pacer.as_mut() {
            let cache = Arc::downgrade(self);
            pacer.on_maintenance_run(now, next_deadline, move || -> Task {
                Box::new(move || {
                    if let Some(inner) = cache.upgrade() {
                        inner.try_maintain();
                    }
                })
            });
        }
    }
}

/// Drops a pending entry's mapping without a notification.
fn discard<K: Hash + Eq, V>(map: &mut ShardMap<K, V>, entry: &EntryRef<K, V>) -> Option<WriteOp<K, V>> {
    if !entry.try_retire() {
        return None;
    }
    if is_mapped(map, entry) {
        map.remove(entry.key());
    }
    if entry.is_ready() {
        // Cancelled after it was published: the nodes go with the next pass.
        Some(WriteOp::Remove(Arc::clone(entry)))
    } else {
        entry.mark_dead();
        None
    }
}

fn same_value<V>(a: &ValueFuture<V>, b: &ValueFuture<V>) -> bool {
    if ValueFuture::ptr_eq(a, b) {
        return true;
    }
    match (a.peek_value(), b.peek_value()) {
        (Some(x), Some(y)) => Arc::ptr_eq(&x, &y),
        _ => false,
    }
}
