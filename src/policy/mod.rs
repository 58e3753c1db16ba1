pub mod lru;

/// Size-based victim selection.
///
/// All methods are called **single-threadedly** by the maintenance path.
/// Implementors only need to be `Send`; `Sync` is not required because
/// the cache wraps the policy in a `Mutex`.  Items are identified by the
/// handle `on_insert` returns.
pub trait Policy<T>: Send {
    /// Starts tracking `item`; returns its handle.
    fn on_insert(&mut self, item: T, weight: u64) -> usize;

    /// Called when a tracked item is read.
    fn on_access(&mut self, handle: usize);

    /// Stops tracking an item.  Stale handles return `None`.
    fn on_remove(&mut self, handle: usize) -> Option<T>;

    /// Removes and returns the next victim while the total weight exceeds
    /// the maximum.
    fn evict(&mut self) -> Option<T>;

    /// Total weight currently tracked by the policy.
    fn current_weight(&self) -> u64;

    /// Maximum weight allowed.
    fn max_weight(&self) -> u64;
}
