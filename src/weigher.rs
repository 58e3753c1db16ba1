//! Value weights for the size bound.
//!
//! Every ready value is weighed once, when it becomes visible: on a
//! synchronous write or when its future completes.  A value still being
//! computed weighs nothing.  The size policy keeps the total at or below
//! `max_capacity`; with the default [`UnitWeigher`] that is an entry count.
//!
//! # Example
//! ```
//! use lungo::CacheBuilder;
//!
//! // Bound the cache by payload bytes instead of entries.
//! let cache: lungo::Cache<u64, Vec<u8>> = CacheBuilder::new(64 * 1024)
//!     .weigher(|_id: &u64, payload: &Vec<u8>| payload.len() as u64)
//!     .build();
//! cache.put(1, vec![0; 512]).unwrap();
//! ```

/// Computes the cost of a cached value.
///
/// Any `Fn(&K, &V) -> u64` closure is a weigher.
pub trait Weigher<K, V>: Send + Sync + 'static {
    fn weigh(&self, key: &K, value: &V) -> u64;
}

impl<K, V, F> Weigher<K, V> for F
where
    F: Fn(&K, &V) -> u64 + Send + Sync + 'static,
{
    #[inline]
    fn weigh(&self, key: &K, value: &V) -> u64 {
        self(key, value)
    }
}

/// Every value costs one unit.  The default.
pub struct UnitWeigher;

impl<K, V> Weigher<K, V> for UnitWeigher {
    #[inline]
    fn weigh(&self, _key: &K, _value: &V) -> u64 {
        1
    }
}

/// The weight the size policy charges for `value`.
///
/// Never below 1, so a zero-weight value cannot slip past the bound.
#[inline]
pub(crate) fn weight_of<K: 'static, V: 'static>(weigher: &dyn Weigher<K, V>, key: &K, value: &V) -> u64 {
    weigher.weigh(key, value).max(1)
}
