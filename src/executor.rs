//! Task runners for asynchronous loads, refreshes and scheduled maintenance.
//!
//! The cache never assumes a threading runtime.  It hands boxed closures to an
//! [`Executor`]; which thread runs them is the executor's business.

use std::sync::Arc;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks, possibly on another thread.
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, task: Task);
}

/// Runs every task immediately on the calling thread.
///
/// The default executor.  It keeps loads and refreshes deterministic, which is
/// what most tests want.
#[derive(Clone, Copy, Debug, Default)]
pub struct SameThreadExecutor;

impl Executor for SameThreadExecutor {
    #[inline]
    fn execute(&self, task: Task) {
        task()
    }
}

/// Spawns a new OS thread per task.
#[derive(Clone, Debug, Default)]
pub struct ThreadExecutor {
    name: Option<String>,
}

impl ThreadExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the spawned threads (useful in panics and profilers).
    pub fn named(name: impl Into<String>) -> Self {
        ThreadExecutor {
            name: Some(name.into()),
        }
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, task: Task) {
        let mut builder = std::thread::Builder::new();
        if let Some(name) = &self.name {
            builder = builder.name(name.clone());
        }
        if let Err(err) = builder.spawn(task) {
            tracing::warn!(error = %err, "failed to spawn executor thread");
        }
    }
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    #[inline]
    fn execute(&self, task: Task) {
        (**self).execute(task)
    }
}
