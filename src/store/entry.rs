//! The per-key record shared by the store, the timer wheel and the size
//! policy.
//!
//! Every write creates a fresh [`Entry`] with a new generation, so an entry's
//! identity (its `Arc` or its generation) tells a long-running refresh whether
//! the mapping it started from is still current.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::future::ValueFuture;

/// Marker for "no wheel / policy node".
pub(crate) const NIL: usize = usize::MAX;

/// Marker for "no variable deadline".
pub(crate) const NEVER: u64 = u64::MAX;

const ALIVE: u8 = 0;
const RETIRED: u8 = 1;
const DEAD: u8 = 2;

pub(crate) type EntryRef<K, V> = Arc<Entry<K, V>>;

pub(crate) struct Entry<K, V> {
    key: K,
    value: ValueFuture<V>,
    generation: u64,
    write_time: AtomicU64,
    access_time: AtomicU64,
    variable_time: AtomicU64,
    weight: AtomicU64,
    /// Set once the value is complete and timestamps describe it.
    ready: AtomicBool,
    /// Timer wheel node, owned by the maintenance pass.
    timer: AtomicUsize,
    /// Size policy node, owned by the maintenance pass.
    policy: AtomicUsize,
    state: AtomicU8,
}

impl<K, V> Entry<K, V> {
    /// An entry whose value is complete, stamped at `now`.
    pub(crate) fn ready(
        key: K,
        value: ValueFuture<V>,
        generation: u64,
        now: u64,
        variable_time: u64,
        weight: u64,
    ) -> Self {
        Entry {
            key,
            value,
            generation,
            write_time: AtomicU64::new(now),
            access_time: AtomicU64::new(now),
            variable_time: AtomicU64::new(variable_time),
            weight: AtomicU64::new(weight),
            ready: AtomicBool::new(true),
            timer: AtomicUsize::new(NIL),
            policy: AtomicUsize::new(NIL),
            state: AtomicU8::new(ALIVE),
        }
    }

    /// An entry holding an in-flight computation.  It weighs nothing and is
    /// invisible to expiration until [`Entry::stamp`] runs.
    pub(crate) fn pending(key: K, value: ValueFuture<V>, generation: u64, now: u64) -> Self {
        Entry {
            ready: AtomicBool::new(false),
            ..Entry::ready(key, value, generation, now, NEVER, 0)
        }
    }

    #[inline]
    pub(crate) fn key(&self) -> &K {
        &self.key
    }

    #[inline]
    pub(crate) fn value(&self) -> &ValueFuture<V> {
        &self.value
    }

    #[inline]
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    // -----------------------------------------------------------------------
    // Timestamps
    // -----------------------------------------------------------------------

    #[inline]
    pub(crate) fn write_time(&self) -> u64 {
        self.write_time.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn access_time(&self) -> u64 {
        self.access_time.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_access_time(&self, now: u64) {
        self.access_time.store(now, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn variable_time(&self) -> u64 {
        self.variable_time.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_variable_time(&self, at: u64) {
        self.variable_time.store(at, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn weight(&self) -> u64 {
        self.weight.load(Ordering::Relaxed)
    }

    /// Publishes a completed value's metadata.  Called once, under the shard
    /// lock, when a pending computation finishes.
    pub(crate) fn stamp(&self, now: u64, variable_time: u64, weight: u64) {
        self.write_time.store(now, Ordering::Relaxed);
        self.access_time.store(now, Ordering::Relaxed);
        self.variable_time.store(variable_time, Ordering::Relaxed);
        self.weight.store(weight, Ordering::Relaxed);
        self.ready.store(true, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Node handles (maintenance lock only)
    // -----------------------------------------------------------------------

    #[inline]
    pub(crate) fn timer(&self) -> usize {
        self.timer.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_timer(&self, handle: usize) {
        self.timer.store(handle, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn policy(&self) -> usize {
        self.policy.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_policy(&self, handle: usize) {
        self.policy.store(handle, Ordering::Relaxed);
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    #[inline]
    pub(crate) fn is_alive(&self) -> bool {
        self.state.load(Ordering::Acquire) == ALIVE
    }

    /// Claims the removal of this entry.  Exactly one caller ever wins.
    #[inline]
    pub(crate) fn try_retire(&self) -> bool {
        self.state
            .compare_exchange(ALIVE, RETIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Final state once the wheel and policy nodes are gone.
    #[inline]
    pub(crate) fn mark_dead(&self) {
        self.state.store(DEAD, Ordering::Release);
    }
}
