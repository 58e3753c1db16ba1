//! Striped lossy read buffer for access-order updates.
//!
//! Cache hits are recorded by offering the entry to this buffer, a single
//! lock-free queue push with **no mutex acquisition**.  The buffer is drained
//! by the maintenance pass, which promotes each entry in the size policy and
//! moves its timer when reads extend its lifetime.
//!
//! Each thread is pinned to one of a power-of-two number of stripes, sized
//! from the available parallelism.  A full stripe drops new offers.  A lost
//! read only leaves the entry's LRU position or timer stale: the maintenance
//! pass re-reads the entry's timestamps before it expires anything, so losing
//! a read never removes a live entry early.

use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_queue::ArrayQueue;

const MAX_STRIPES: usize = 16;
const STRIPE_CAPACITY: usize = 16;

static NEXT_THREAD_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static THREAD_ID: usize = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

fn stripe_count() -> usize {
    std::thread::available_parallelism()
        .map_or(1, |n| n.get())
        .next_power_of_two()
        .min(MAX_STRIPES)
}

#[repr(align(64))]
struct Stripe<T>(ArrayQueue<T>);

/// A lock-free, lossy, striped buffer of recently read items.
pub struct ReadBuffer<T> {
    stripes: Box<[Stripe<T>]>,
    mask: usize,
}

impl<T> ReadBuffer<T> {
    pub fn new() -> Self {
        Self::with_stripes(stripe_count())
    }

    fn with_stripes(count: usize) -> Self {
        debug_assert!(count.is_power_of_two());
        ReadBuffer {
            stripes: (0..count).map(|_| Stripe(ArrayQueue::new(STRIPE_CAPACITY))).collect(),
            mask: count - 1,
        }
    }

    /// Offers an item to the calling thread's stripe.
    ///
    /// Returns `false` if the stripe is full and the item was dropped; the
    /// caller should then run a maintenance pass.
    #[inline]
    pub fn offer(&self, item: T) -> bool {
        let stripe = THREAD_ID.with(|id| *id & self.mask);
        self.stripes[stripe].0.push(item).is_ok()
    }

    /// Moves every buffered item into `out`, stripe by stripe.
    pub fn drain(&self, out: &mut Vec<T>) {
        for Stripe(queue) in self.stripes.iter() {
            out.extend(std::iter::from_fn(|| queue.pop()));
        }
    }
}

impl<T> Default for ReadBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn offer_and_drain() {
        let buf = ReadBuffer::new();
        buf.offer(42);
        buf.offer(99);

        let mut out = Vec::new();
        buf.drain(&mut out);
        assert_eq!(out, vec![42, 99]);

        out.clear();
        buf.drain(&mut out);
        assert!(out.is_empty(), "buffer should be empty after drain");
    }

    #[test]
    fn full_stripe_drops_offers() {
        let buf = ReadBuffer::with_stripes(1);
        let accepted = (0..32u64).filter(|i| buf.offer(*i)).count();
        assert_eq!(accepted, STRIPE_CAPACITY);
    }

    #[test]
    fn concurrent_offers_do_not_panic() {
        let buf = Arc::new(ReadBuffer::new());
        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let b = Arc::clone(&buf);
                std::thread::spawn(move || {
                    for j in 0..50u64 {
                        b.offer(t * 1000 + j);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let mut out = Vec::new();
        buf.drain(&mut out);
        assert!(!out.is_empty());
        assert!(out.len() <= buf.stripes.len() * STRIPE_CAPACITY);
    }
}
