use std::hash::Hash;
use std::sync::Arc;

use ahash::{AHashMap, RandomState};
use parking_lot::RwLock;

use super::entry::{Entry, EntryRef};

// ---------------------------------------------------------------------------
// Shard
// ---------------------------------------------------------------------------

pub(crate) type ShardMap<K, V> = AHashMap<K, EntryRef<K, V>>;

/// Cache-line padding to prevent false sharing between shards.
#[repr(align(64))]
pub(crate) struct Shard<K, V> {
    pub(crate) map: RwLock<ShardMap<K, V>>,
}

// ---------------------------------------------------------------------------
// ShardedStore
// ---------------------------------------------------------------------------

/// A thread-safe map from key to [`Entry`] backed by `N` independently locked
/// shards.
///
/// Reads take the shard's shared lock.  Every mutation goes through
/// [`ShardedStore::compute`], which runs a closure under the shard's exclusive
/// lock and so makes a read-decide-write sequence atomic per key.
pub(crate) struct ShardedStore<K, V> {
    shards: Box<[Shard<K, V>]>,
    /// Always `shards.len() - 1`; shards.len() is a power of two.
    shard_mask: usize,
    /// Hasher used only to compute shard indices.
    build_hasher: RandomState,
}

impl<K: Hash + Eq + Clone, V> ShardedStore<K, V> {
    pub fn new(num_shards: usize) -> Self {
        assert!(num_shards.is_power_of_two());
        let shards = (0..num_shards)
            .map(|_| Shard {
                map: RwLock::new(AHashMap::new()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        ShardedStore {
            shards,
            shard_mask: num_shards - 1,
            build_hasher: RandomState::new(),
        }
    }

    #[inline]
    fn shard_index(&self, key: &K) -> usize {
        let h = self.build_hasher.hash_one(key);
        // Use the high bits (better avalanche from ahash).
        ((h >> 32) as usize) & self.shard_mask
    }

    // -----------------------------------------------------------------------
    // Core operations
    // -----------------------------------------------------------------------

    /// Returns the entry mapped to `key`, whatever its expiration status.
    pub fn get(&self, key: &K) -> Option<EntryRef<K, V>> {
        let idx = self.shard_index(key);
        self.shards[idx].map.read().get(key).map(Arc::clone)
    }

    /// Runs `f` with exclusive access to the shard that owns `key`.
    ///
    /// `f` must not call back into the store.
    pub fn compute<R>(&self, key: &K, f: impl FnOnce(&mut ShardMap<K, V>) -> R) -> R {
        let idx = self.shard_index(key);
        let mut map = self.shards[idx].map.write();
        f(&mut map)
    }

    /// Returns the total number of mapped entries across all shards,
    /// including expired entries that have not been swept yet.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.map.read().len()).sum()
    }

    /// A point-in-time copy of every mapped entry.
    ///
    /// Shards are visited one at a time, so concurrent writers are never
    /// blocked for longer than a single shard copy.
    pub fn snapshot(&self) -> Vec<EntryRef<K, V>> {
        let mut entries = Vec::with_capacity(self.len());
        for shard in self.shards.iter() {
            entries.extend(shard.map.read().values().map(Arc::clone));
        }
        entries
    }
}

/// Returns `true` if `map` still maps the entry's key to that very entry.
#[inline]
pub(crate) fn is_mapped<K: Hash + Eq, V>(map: &ShardMap<K, V>, entry: &Entry<K, V>) -> bool {
    map.get(entry.key())
        .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), entry))
}
