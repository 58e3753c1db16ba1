//! Hierarchical timer wheel for expiration.
//!
//! ## Algorithm
//!
//! The wheel has **5 tiers**, each composed of a fixed number of buckets.
//! Every tier covers a geometrically larger time range:
//!
//! | Tier | Buckets | Bucket span      | Holds delays below |
//! |------|---------|------------------|--------------------|
//! | 0    | 64      | 2^30 ns ≈ 1.07 s | 2^36 ns ≈ 1.1 min  |
//! | 1    | 64      | 2^36 ns ≈ 1.1 min| 2^42 ns ≈ 1.2 hr   |
//! | 2    | 32      | 2^42 ns ≈ 1.2 hr | 2^46 ns ≈ 19.5 hr  |
//! | 3    | 4       | 2^46 ns ≈ 19.5 hr| 2^48 ns ≈ 3.3 day  |
//! | 4    | 1       | catch-all        | unbounded          |
//!
//! Nodes live in one arena (`Vec<Node<T>>`) and are linked by index.  Each
//! bucket is a circular doubly linked list headed by a sentinel node, so
//! linking and unlinking never special-case the list ends.  The handle
//! returned by [`TimerWheel::schedule`] is the node's arena index; the caller
//! stores it next to the scheduled item and hands it back to reschedule or
//! cancel in O(1).
//!
//! ### Scheduling
//!
//! An item goes to the *finest* tier whose full range covers
//! `deadline − now`, in the bucket selected by the deadline's tick at that
//! tier.  Items are appended, so equal deadlines fire in insertion order.
//!
//! ### Advancing
//!
//! `advance(now)` walks the tiers from finest to coarsest.  At each tier it
//! visits every bucket from the previous tick through the current tick
//! inclusive (at most one revolution).  Each visited bucket is detached as a
//! whole; due items are returned, the rest are re-inserted relative to the new
//! time, which cascades them into finer tiers.  A coarser tier is only walked
//! when its own tick moved.  The current finest bucket is always revisited so
//! that an item due at exactly `now` fires without waiting for the next tick.
//!
//! ## References
//! - Varghese & Lauck (1987). *Hashed and Hierarchical Timing Wheels.*

// ---------------------------------------------------------------------------
// Wheel geometry (power-of-two bucket spans)
// ---------------------------------------------------------------------------

/// Bucket span in nanoseconds for each tier; the extra trailing element is
/// the upper bound of the last bounded tier.
const SPANS: [u64; 6] = [
    1u64 << 30, // Tier 0: ~1.07 s / bucket
    1u64 << 36, // Tier 1: ~1.14 min / bucket
    1u64 << 42, // Tier 2: ~1.22 hr / bucket
    1u64 << 46, // Tier 3: ~19.5 hr / bucket
    1u64 << 48, // Tier 4: catch-all
    1u64 << 48,
];

/// `log2(SPANS[tier])`.
const SHIFT: [u32; 5] = [30, 36, 42, 46, 48];

/// Number of buckets per tier.
const BUCKETS: [usize; 5] = [64, 64, 32, 4, 1];

/// Arena index of each tier's first sentinel.
const OFFSETS: [usize; 5] = [0, 64, 128, 160, 164];

const SENTINELS: usize = 165;

const NIL: usize = usize::MAX;

struct Node<T> {
    /// `None` for sentinels and freed slots.
    item: Option<T>,
    deadline: u64,
    prev: usize,
    next: usize,
}

// ---------------------------------------------------------------------------
// TimerWheel
// ---------------------------------------------------------------------------

/// A hierarchical timer wheel over items of type `T`.
///
/// All times are nanoseconds read from the cache's [`Ticker`]; the wheel
/// never reads a clock itself.
///
/// [`Ticker`]: crate::ticker::Ticker
pub struct TimerWheel<T> {
    /// `nodes[..SENTINELS]` are bucket sentinels, the rest are items.
    nodes: Vec<Node<T>>,
    /// Indices of freed (reusable) item slots.
    free_list: Vec<usize>,
    /// Time of the last `advance`.
    nanos: u64,
    len: usize,
}

impl<T> TimerWheel<T> {
    /// Creates an empty wheel anchored at `start_nanos`.
    pub fn new(start_nanos: u64) -> Self {
        let nodes = (0..SENTINELS)
            .map(|idx| Node {
                item: None,
                deadline: 0,
                prev: idx,
                next: idx,
            })
            .collect();
        TimerWheel {
            nodes,
            free_list: Vec::new(),
            nanos: start_nanos,
            len: 0,
        }
    }

    // -----------------------------------------------------------------------
    // List plumbing
    // -----------------------------------------------------------------------

    /// Returns the sentinel of the bucket an item due at `deadline` belongs to.
    fn find_bucket(&self, deadline: u64) -> usize {
        // Overdue items go to the current bucket, which the next advance visits.
        let time = deadline.max(self.nanos);
        let duration = time - self.nanos;
        for tier in 0..4 {
            if duration < SPANS[tier + 1] {
                let ticks = (time >> SHIFT[tier]) as usize;
                return OFFSETS[tier] + (ticks & (BUCKETS[tier] - 1));
            }
        }
        OFFSETS[4]
    }

    /// Appends `idx` at the tail of the bucket headed by `sentinel`.
    fn link(&mut self, sentinel: usize, idx: usize) {
        let tail = self.nodes[sentinel].prev;
        self.nodes[idx].prev = tail;
        self.nodes[idx].next = sentinel;
        self.nodes[tail].next = idx;
        self.nodes[sentinel].prev = idx;
    }

    fn unlink(&mut self, idx: usize) {
        let prev = self.nodes[idx].prev;
        let next = self.nodes[idx].next;
        self.nodes[prev].next = next;
        self.nodes[next].prev = prev;
        self.nodes[idx].prev = NIL;
        self.nodes[idx].next = NIL;
    }

    fn alloc(&mut self, item: T, deadline: u64) -> usize {
        let node = Node {
            item: Some(item),
            deadline,
            prev: NIL,
            next: NIL,
        };
        if let Some(idx) = self.free_list.pop() {
            self.nodes[idx] = node;
            idx
        } else {
            self.nodes.push(node);
            self.nodes.len() - 1
        }
    }

    fn release(&mut self, idx: usize) -> Option<T> {
        let item = self.nodes[idx].item.take()?;
        self.free_list.push(idx);
        self.len -= 1;
        Some(item)
    }

    #[inline]
    fn is_live(&self, handle: usize) -> bool {
        handle >= SENTINELS && handle < self.nodes.len() && self.nodes[handle].item.is_some()
    }

    // -----------------------------------------------------------------------
    // Public API
    // -----------------------------------------------------------------------

    /// Schedules `item` to fire at `deadline` and returns its handle.
    pub fn schedule(&mut self, item: T, deadline: u64) -> usize {
        let idx = self.alloc(item, deadline);
        let bucket = self.find_bucket(deadline);
        self.link(bucket, idx);
        self.len += 1;
        idx
    }

    /// Moves a scheduled item to a new deadline.  Returns `false` for a stale
    /// handle.
    pub fn reschedule(&mut self, handle: usize, deadline: u64) -> bool {
        if !self.is_live(handle) {
            return false;
        }
        self.unlink(handle);
        self.nodes[handle].deadline = deadline;
        let bucket = self.find_bucket(deadline);
        self.link(bucket, handle);
        true
    }

    /// Removes a scheduled item, returning it.
    pub fn cancel(&mut self, handle: usize) -> Option<T> {
        if !self.is_live(handle) {
            return None;
        }
        self.unlink(handle);
        self.release(handle)
    }

    /// The deadline a live handle is scheduled for.
    pub fn deadline(&self, handle: usize) -> Option<u64> {
        self.is_live(handle).then(|| self.nodes[handle].deadline)
    }

    /// Advances the wheel to `now` and returns every item whose deadline is
    /// `<= now`, in bucket order.
    ///
    /// Time moving backwards is ignored.
    pub fn advance(&mut self, now: u64) -> Vec<T> {
        let mut expired = Vec::new();
        if now < self.nanos {
            return expired;
        }
        let previous = self.nanos;
        self.nanos = now;

        for tier in 0..5 {
            let previous_ticks = previous >> SHIFT[tier];
            let current_ticks = now >> SHIFT[tier];
            let delta = current_ticks - previous_ticks;
            if delta == 0 && tier > 0 {
                break;
            }
            self.expire_tier(tier, previous_ticks, delta, &mut expired);
        }
        expired
    }

    fn expire_tier(&mut self, tier: usize, previous_ticks: u64, delta: u64, out: &mut Vec<T>) {
        let mask = BUCKETS[tier] - 1;
        let steps = (delta.saturating_add(1)).min(BUCKETS[tier] as u64) as usize;
        let start = (previous_ticks as usize) & mask;

        for i in start..start + steps {
            let sentinel = OFFSETS[tier] + (i & mask);
            // Detach the whole bucket before walking it so that re-inserted
            // items are not visited twice.
            let mut cursor = self.nodes[sentinel].next;
            self.nodes[sentinel].prev = sentinel;
            self.nodes[sentinel].next = sentinel;

            while cursor != sentinel {
                let next = self.nodes[cursor].next;
                self.nodes[cursor].prev = NIL;
                self.nodes[cursor].next = NIL;
                let deadline = self.nodes[cursor].deadline;
                if deadline <= self.nanos {
                    if let Some(item) = self.release(cursor) {
                        out.push(item);
                    }
                } else {
                    let bucket = self.find_bucket(deadline);
                    self.link(bucket, cursor);
                }
                cursor = next;
            }
        }
    }

    /// Returns the earliest scheduled deadline, or `None` when nothing is
    /// scheduled.
    ///
    /// Each tier is scanned from the current tick up to the first bucket that
    /// holds an item due within this revolution.  A bucket may also hold items
    /// one revolution ahead; those count toward the minimum but do not stop
    /// the scan.
    pub fn next_deadline(&self) -> Option<u64> {
        if self.len == 0 {
            return None;
        }
        let mut earliest: Option<u64> = None;
        for tier in 0..5 {
            let mask = BUCKETS[tier] - 1;
            let ticks = self.nanos >> SHIFT[tier];
            for step in 0..BUCKETS[tier] as u64 {
                let sentinel = OFFSETS[tier] + ((ticks + step) as usize & mask);
                let mut in_window = false;
                let mut cursor = self.nodes[sentinel].next;
                while cursor != sentinel {
                    let deadline = self.nodes[cursor].deadline;
                    earliest = Some(earliest.map_or(deadline, |e| e.min(deadline)));
                    in_window |= (deadline >> SHIFT[tier]) <= ticks + step;
                    cursor = self.nodes[cursor].next;
                }
                if in_window {
                    break;
                }
            }
        }
        earliest
    }

    /// Removes every scheduled item.
    pub fn clear(&mut self) -> Vec<T> {
        let mut items = Vec::with_capacity(self.len);
        for idx in SENTINELS..self.nodes.len() {
            if let Some(item) = self.nodes[idx].item.take() {
                items.push(item);
            }
        }
        self.nodes.truncate(SENTINELS);
        for (idx, sentinel) in self.nodes.iter_mut().enumerate() {
            sentinel.prev = idx;
            sentinel.next = idx;
        }
        self.free_list.clear();
        self.len = 0;
        items
    }

    /// Time of the last [`TimerWheel::advance`].
    pub fn nanos(&self) -> u64 {
        self.nanos
    }

    /// Returns the number of items currently scheduled (O(1)).
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if nothing is scheduled.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
