//! Coalesces the cache's external wake-ups.
//!
//! At most one wake-up is armed at a time.  Requests whose fire time lands
//! within [`TOLERANCE`] of the armed one are dropped, so a burst of writes with
//! fresh deadlines costs a single scheduler call.

use std::sync::Arc;
use std::time::Duration;

use crate::executor::{Executor, Task};
use crate::scheduler::{Cancellable, Scheduler};

/// Acceptable early/late slack for a fired expiration (2^30 ns ≈ 1.07 s).
pub const TOLERANCE: u64 = 1 << 30;

pub struct Pacer {
    scheduler: Arc<dyn Scheduler>,
    executor: Arc<dyn Executor>,
    next_fire_time: u64,
    future: Option<Box<dyn Cancellable>>,
}

impl Pacer {
    pub fn new(scheduler: Arc<dyn Scheduler>, executor: Arc<dyn Executor>) -> Self {
        Pacer {
            scheduler,
            executor,
            next_fire_time: 0,
            future: None,
        }
    }

    /// `true` while a wake-up is pending.
    pub fn is_armed(&self) -> bool {
        self.future.as_ref().is_some_and(|f| !f.is_done())
    }

    /// Absolute time of the armed wake-up.
    pub fn next_fire_time(&self) -> Option<u64> {
        self.is_armed().then_some(self.next_fire_time)
    }

    /// Requests a wake-up at `candidate`.
    ///
    /// Returns `false` if an armed wake-up within [`TOLERANCE`] already
    /// covers it.  Otherwise the pending wake-up is cancelled and a new one
    /// is armed for `max(candidate, now)`, never sooner than `TOLERANCE`
    /// from `now`.
    pub fn schedule(&mut self, now: u64, candidate: u64, task: impl FnOnce() -> Task) -> bool {
        if self.is_armed() && candidate.abs_diff(self.next_fire_time) <= TOLERANCE {
            return false;
        }
        self.cancel();

        let fire_at = candidate.max(now);
        let delay = (fire_at - now).max(TOLERANCE);
        self.next_fire_time = now.saturating_add(delay);
        self.future = Some(self.scheduler.schedule(
            Arc::clone(&self.executor),
            task(),
            Duration::from_nanos(delay),
        ));
        tracing::debug!(delay_nanos = delay, "armed expiration wake-up");
        true
    }

    /// Called at the end of every maintenance pass with the wheel's earliest
    /// deadline.
    ///
    /// A fired wake-up is forgotten; an empty wheel disarms the pacer;
    /// otherwise the pacer is re-armed for the new earliest expiration.
    pub fn on_maintenance_run(
        &mut self,
        now: u64,
        next_deadline: Option<u64>,
        task: impl FnOnce() -> Task,
    ) {
        if self.future.as_ref().is_some_and(|f| f.is_done()) {
            self.future = None;
        }
        match next_deadline {
            None => self.cancel(),
            Some(deadline) => {
                self.schedule(now, deadline, task);
            }
        }
    }

    /// Cancels any pending wake-up.
    pub fn cancel(&mut self) {
        if let Some(future) = self.future.take() {
            future.cancel();
        }
    }
}
