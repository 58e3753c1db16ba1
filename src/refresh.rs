//! Reload-in-place.
//!
//! A refresh reloads a key in the background while readers keep seeing the
//! current value.  At most one refresh runs per key; asking again while one
//! is in flight returns the same future.  Each refresh remembers the
//! generation of the entry it started from, which decides what happens when
//! the key was written, invalidated or evicted before the reload finished.
//!
//! # Example
//! ```
//! use lungo::{CacheBuilder, FnLoader};
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use std::sync::Arc;
//!
//! let calls = Arc::new(AtomicU32::new(0));
//! let counter = Arc::clone(&calls);
//! let cache = CacheBuilder::new(100).build_with_loader(FnLoader::new(move |key: &u32| {
//!     Ok(Some(key * 10 + counter.fetch_add(1, Ordering::SeqCst)))
//! }));
//!
//! assert_eq!(*cache.get(&1).unwrap().unwrap(), 10);
//! let refreshed = cache.refresh(1);
//! assert_eq!(*refreshed.join().unwrap().unwrap(), 11);
//! assert_eq!(*cache.get_if_present(&1).unwrap(), 11);
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::Mutex;

use crate::cache::{Inner, Write};
use crate::error::CacheError;
use crate::future::{Outcome, ValueFuture};
use crate::listener::RemovalCause;

/// How a completing refresh treats writes that happened while it ran.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConsistencyMode {
    /// A refresh installs its value only over the exact entry it started
    /// from, or over an absence that nobody invalidated in the meantime.
    /// Any intervening put, invalidation or eviction wins and the refreshed
    /// value is discarded.
    #[default]
    Linearizable,
    /// A refreshed value is always installed (last completion wins).  A
    /// refresh that finds no value removes the key only if it still holds
    /// the entry the refresh started from.
    Relaxed,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

pub(crate) struct RefreshRecord<V> {
    future: ValueFuture<V>,
    /// Generation of the entry the refresh started from, `None` if the key
    /// was absent.
    generation: Option<u64>,
    /// Cleared when the key is invalidated while the refresh runs.
    active: AtomicBool,
}

/// The in-flight refreshes, at most one per key.
pub(crate) struct Refreshes<K, V> {
    records: Mutex<AHashMap<K, Arc<RefreshRecord<V>>>>,
}

impl<K: Hash + Eq + Clone, V> Refreshes<K, V> {
    pub(crate) fn new() -> Self {
        Refreshes {
            records: Mutex::new(AHashMap::new()),
        }
    }

    pub(crate) fn snapshot(&self) -> HashMap<K, ValueFuture<V>> {
        self.records
            .lock()
            .iter()
            .map(|(key, record)| (key.clone(), record.future.clone()))
            .collect()
    }

    /// Forgets the key's refresh; its result will not be installed.
    pub(crate) fn discard(&self, key: &K) {
        if let Some(record) = self.records.lock().remove(key) {
            record.active.store(false, Ordering::Release);
        }
    }

    pub(crate) fn discard_all(&self) {
        for (_, record) in self.records.lock().drain() {
            record.active.store(false, Ordering::Release);
        }
    }

    /// Drops the key's record if it is still `record`.
    fn release(&self, key: &K, record: &Arc<RefreshRecord<V>>) {
        let mut records = self.records.lock();
        if records.get(key).is_some_and(|current| Arc::ptr_eq(current, record)) {
            records.remove(key);
        }
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

impl<K, V> Inner<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Starts reloading `key` unless a refresh is already in flight.
    ///
    /// `start` receives the current value (if any) and returns the reload.
    /// A key whose first load is still running returns that load instead.
    pub(crate) fn refresh<F>(self: &Arc<Self>, key: K, start: F) -> ValueFuture<V>
    where
        F: FnOnce(&K, Option<Arc<V>>) -> ValueFuture<V>,
    {
        let (old_value, generation) = match self.peek(&key) {
            Some(entry) if !entry.is_ready() => return entry.value().clone(),
            Some(entry) => (entry.value().peek_value(), Some(entry.generation())),
            None => (None, None),
        };

        // The record goes in before the reload starts, so the loader runs
        // without the records lock held.
        let record = {
            let mut records = self.refreshes.records.lock();
            if let Some(existing) = records.get(&key) {
                return existing.future.clone();
            }
            let record = Arc::new(RefreshRecord {
                future: ValueFuture::new(),
                generation,
                active: AtomicBool::new(true),
            });
            records.insert(key.clone(), Arc::clone(&record));
            record
        };

        let future = record.future.clone();
        let cache = Arc::downgrade(self);
        let handle = Arc::clone(&record);
        let refreshed_key = key.clone();
        future.on_complete(move |outcome| {
            if let Some(inner) = cache.upgrade() {
                inner.on_refreshed(&refreshed_key, &handle, outcome);
            }
        });

        let source = match panic::catch_unwind(AssertUnwindSafe(|| start(&key, old_value))) {
            Ok(source) => source,
            Err(payload) => {
                future.complete_exceptionally(CacheError::load("reload panicked"));
                panic::resume_unwind(payload)
            }
        };
        let placeholder = future.clone();
        source.on_complete(move |outcome| {
            placeholder.complete_with(outcome.clone());
        });
        // Cancelling the returned future cancels the reload.
        future.on_complete(move |outcome| {
            if matches!(outcome, Err(err) if err.is_cancelled()) {
                source.cancel();
            }
        });
        future
    }

    fn on_refreshed(self: &Arc<Self>, key: &K, record: &Arc<RefreshRecord<V>>, outcome: &Outcome<V>) {
        match outcome {
            Err(err) if err.is_cancelled() => {}
            Err(err) => {
                self.metrics.record_load_failure();
                tracing::warn!(error = %err, "refresh failed; keeping the previous value");
            }
            Ok(value) => {
                self.record_load(outcome);
                if let Err(err) = self.install_refresh(key, record, value.clone()) {
                    tracing::warn!(error = %err, "refreshed value rejected by expiry policy");
                }
            }
        }
        self.refreshes.release(key, record);
    }

    fn install_refresh(
        self: &Arc<Self>,
        key: &K,
        record: &RefreshRecord<V>,
        value: Option<Arc<V>>,
    ) -> Result<(), CacheError> {
        let mut discarded = None;
        self.compute(key, |live| {
            let started_here = live.is_some_and(|entry| Some(entry.generation()) == record.generation);
            let apply = match self.consistency {
                ConsistencyMode::Linearizable => {
                    record.active.load(Ordering::Acquire)
                        && (started_here || (live.is_none() && record.generation.is_none()))
                }
                ConsistencyMode::Relaxed => value.is_some() || started_here,
            };
            if !apply {
                if let Some(v) = &value {
                    let cause = if live.is_some() {
                        RemovalCause::Replaced
                    } else {
                        RemovalCause::Explicit
                    };
                    discarded = Some((Arc::clone(v), cause));
                }
                return Write::Keep;
            }
            match &value {
                Some(v) => Write::Insert(ValueFuture::ready(Arc::clone(v))),
                None if live.is_some() => Write::Remove(RemovalCause::Explicit),
                None => Write::Keep,
            }
        })?;
        if let Some((value, cause)) = discarded {
            tracing::trace!(?cause, "discarding a refreshed value");
            self.notify(key, value, cause);
        }
        Ok(())
    }
}
