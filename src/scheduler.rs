//! Delayed task submission used to wake the cache up for expiration.
//!
//! A [`Scheduler`] is optional.  Without one, expired entries are swept only
//! when the cache is touched (inline checks on access and a maintenance pass
//! after writes).  With one, the [`Pacer`](crate::expiry::pacer::Pacer) arms a
//! single wake-up for the earliest deadline in the timer wheel.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::executor::{Executor, Task};

/// Handle to a scheduled task.
pub trait Cancellable: Send + Sync {
    /// Prevents the task from running if it has not started yet.
    fn cancel(&self);

    /// Returns `true` once the task has been handed to its executor or was
    /// cancelled.
    fn is_done(&self) -> bool;
}

/// Runs a task on `executor` after `delay`.
pub trait Scheduler: Send + Sync + 'static {
    fn schedule(
        &self,
        executor: Arc<dyn Executor>,
        task: Task,
        delay: Duration,
    ) -> Box<dyn Cancellable>;
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    fn schedule(
        &self,
        executor: Arc<dyn Executor>,
        task: Task,
        delay: Duration,
    ) -> Box<dyn Cancellable> {
        (**self).schedule(executor, task, delay)
    }
}

// ---------------------------------------------------------------------------
// Task handle
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct HandleState {
    cancelled: AtomicBool,
    done: AtomicBool,
}

/// The handle returned by [`ThreadScheduler`].
#[derive(Clone, Debug)]
pub struct ScheduledHandle {
    state: Arc<HandleState>,
}

impl Cancellable for ScheduledHandle {
    fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
        self.state.done.store(true, Ordering::Release);
    }

    fn is_done(&self) -> bool {
        self.state.done.load(Ordering::Acquire)
    }
}

// ---------------------------------------------------------------------------
// ThreadScheduler
// ---------------------------------------------------------------------------

struct Timed {
    at: Instant,
    seq: u64,
    executor: Arc<dyn Executor>,
    task: Task,
    state: Arc<HandleState>,
}

impl PartialEq for Timed {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Timed {}

impl PartialOrd for Timed {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timed {
    // Reversed so the max-heap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct TimerQueue {
    heap: BinaryHeap<Timed>,
    seq: u64,
    shutdown: bool,
}

#[derive(Default)]
struct TimerShared {
    queue: Mutex<TimerQueue>,
    cond: Condvar,
}

/// A scheduler backed by one dedicated timer thread.
///
/// The thread only waits for deadlines; due tasks are handed to the
/// executor supplied with each task.  Dropping the scheduler stops the thread.
pub struct ThreadScheduler {
    shared: Arc<TimerShared>,
}

impl ThreadScheduler {
    pub fn new() -> Self {
        let shared = Arc::new(TimerShared::default());
        let worker = Arc::clone(&shared);
        let spawned = std::thread::Builder::new()
            .name("lungo-scheduler".to_string())
            .spawn(move || run_timer_loop(&worker));
        if let Err(err) = spawned {
            // Without the thread the cache degrades to inline expiration.
            tracing::warn!(error = %err, "failed to start scheduler thread");
        }
        ThreadScheduler { shared }
    }
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        self.shared.queue.lock().shutdown = true;
        self.shared.cond.notify_all();
    }
}

impl Scheduler for ThreadScheduler {
    fn schedule(
        &self,
        executor: Arc<dyn Executor>,
        task: Task,
        delay: Duration,
    ) -> Box<dyn Cancellable> {
        let state = Arc::new(HandleState::default());
        {
            let mut queue = self.shared.queue.lock();
            queue.seq += 1;
            let seq = queue.seq;
            queue.heap.push(Timed {
                at: Instant::now() + delay,
                seq,
                executor,
                task,
                state: Arc::clone(&state),
            });
        }
        self.shared.cond.notify_one();
        Box::new(ScheduledHandle { state })
    }
}

fn run_timer_loop(shared: &TimerShared) {
    loop {
        let due = {
            let mut queue = shared.queue.lock();
            loop {
                if queue.shutdown {
                    return;
                }
                let next_at = queue.heap.peek().map(|t| t.at);
                match next_at {
                    None => shared.cond.wait(&mut queue),
                    Some(at) if at <= Instant::now() => break,
                    Some(at) => {
                        shared.cond.wait_until(&mut queue, at);
                    }
                }
            }
            queue.heap.pop()
        };
        let Some(timed) = due else { continue };
        if timed.state.cancelled.load(Ordering::Acquire) {
            continue;
        }
        timed.state.done.store(true, Ordering::Release);
        timed.executor.execute(timed.task);
    }
}
