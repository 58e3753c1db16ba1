//! Bounded MPSC write buffer backed by a lock-free `ArrayQueue`.
//!
//! Writers publish their store change under the shard lock, then enqueue the
//! matching wheel/policy update here so the write path never blocks on the
//! maintenance mutex.  A maintenance pass drains the queue and applies all
//! pending operations under a single lock acquisition.
//!
//! If the queue is full when a push is attempted, the operation is returned
//! to the caller as `Err(op)` so it can be applied synchronously.  Write
//! operations must never be lost: they drive capacity accounting and the
//! `RETIRED → DEAD` transition.

use crossbeam_queue::ArrayQueue;

use crate::store::entry::EntryRef;

/// Bounded capacity of the write queue.
const WRITE_BUFFER_CAPACITY: usize = 128;

/// Operations deferred for maintenance.
pub enum WriteOp<K, V> {
    /// A ready entry became mapped; track its weight and deadline.
    Add(EntryRef<K, V>),
    /// An entry was retired; unlink its wheel and policy nodes.
    Remove(EntryRef<K, V>),
}

/// Bounded MPSC write buffer.
///
/// Multiple producer threads may call [`push`] concurrently.  A single
/// consumer (the maintenance pass) drains the queue via [`drain`].
///
/// [`push`]: WriteBuffer::push
/// [`drain`]: WriteBuffer::drain
pub struct WriteBuffer<K, V> {
    queue: ArrayQueue<WriteOp<K, V>>,
}

impl<K, V> WriteBuffer<K, V> {
    /// Creates a new write buffer with the default capacity.
    pub fn new() -> Self {
        WriteBuffer {
            queue: ArrayQueue::new(WRITE_BUFFER_CAPACITY),
        }
    }

    /// Enqueues `op`.
    ///
    /// Returns `Err(op)` if the queue is full.  The caller **must not drop**
    /// a returned `Err`.
    #[inline]
    pub fn push(&self, op: WriteOp<K, V>) -> Result<(), WriteOp<K, V>> {
        self.queue.push(op)
    }

    /// Drains all pending operations into `out`, oldest first.
    pub fn drain(&self, out: &mut Vec<WriteOp<K, V>>) {
        while let Some(op) = self.queue.pop() {
            out.push(op);
        }
    }
}

impl<K, V> Default for WriteBuffer<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
