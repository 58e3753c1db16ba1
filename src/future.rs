//! Single-assignment futures for cached values.
//!
//! A [`ValueFuture`] is the unit stored by the cache: synchronous values are
//! completed futures, asynchronous computations are pending ones.  It can be
//! awaited (it implements [`Future`]), joined from blocking code, or observed
//! through completion callbacks.  Completion happens at most once; later
//! attempts are ignored and report `false`.
//!
//! # Example
//! ```
//! use lungo::ValueFuture;
//!
//! let future: ValueFuture<u32> = ValueFuture::new();
//! let reader = future.clone();
//! assert!(!reader.is_done());
//! assert!(future.complete(7));
//! assert_eq!(*reader.join().unwrap().unwrap(), 7);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::{Condvar, Mutex};

use crate::error::{BoxError, CacheError};
use crate::executor::Executor;

/// The terminal result of a computation.
///
/// `Ok(None)` means the computation finished without a value; such futures
/// never stay mapped in a cache.
pub type Outcome<V> = Result<Option<Arc<V>>, CacheError>;

type Callback<V> = Box<dyn FnOnce(&Outcome<V>) + Send + 'static>;

enum State<V> {
    Pending {
        wakers: Vec<Waker>,
        callbacks: Vec<Callback<V>>,
    },
    Done(Outcome<V>),
}

struct Shared<V> {
    state: Mutex<State<V>>,
    done: Condvar,
}

/// A cloneable, single-assignment future of an `Arc<V>`.
///
/// Clones share the same slot, so identity is observable through
/// [`ValueFuture::ptr_eq`].
pub struct ValueFuture<V> {
    shared: Arc<Shared<V>>,
}

impl<V> Clone for ValueFuture<V> {
    fn clone(&self) -> Self {
        ValueFuture {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<V> ValueFuture<V> {
    fn with_state(state: State<V>) -> Self {
        ValueFuture {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                done: Condvar::new(),
            }),
        }
    }

    /// Creates an incomplete future.
    pub fn new() -> Self {
        Self::with_state(State::Pending {
            wakers: Vec::new(),
            callbacks: Vec::new(),
        })
    }

    /// Creates a future already completed with `outcome`.
    pub fn from_outcome(outcome: Outcome<V>) -> Self {
        Self::with_state(State::Done(outcome))
    }

    /// Creates a future already completed with `value`.
    pub fn completed(value: V) -> Self {
        Self::from_outcome(Ok(Some(Arc::new(value))))
    }

    /// Creates a future already completed with a shared value.
    pub fn ready(value: Arc<V>) -> Self {
        Self::from_outcome(Ok(Some(value)))
    }

    /// Creates a future completed without a value.
    pub fn absent() -> Self {
        Self::from_outcome(Ok(None))
    }

    /// Creates a future completed with `err`.
    pub fn failed(err: CacheError) -> Self {
        Self::from_outcome(Err(err))
    }

    /// Returns `true` if both handles refer to the same computation.
    #[inline]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.shared, &b.shared)
    }

    pub fn is_done(&self) -> bool {
        matches!(*self.shared.state.lock(), State::Done(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(*self.shared.state.lock(), State::Done(Err(CacheError::Cancelled)))
    }

    /// `true` once completed with an error (cancellation included).
    pub fn is_completed_exceptionally(&self) -> bool {
        matches!(*self.shared.state.lock(), State::Done(Err(_)))
    }

    /// Returns the outcome if the future is done, without blocking.
    pub fn peek(&self) -> Option<Outcome<V>> {
        match &*self.shared.state.lock() {
            State::Done(outcome) => Some(outcome.clone()),
            State::Pending { .. } => None,
        }
    }

    /// Returns the value if the future completed successfully with one.
    pub fn peek_value(&self) -> Option<Arc<V>> {
        match &*self.shared.state.lock() {
            State::Done(Ok(Some(value))) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    /// Blocks the calling thread until the future completes.
    pub fn join(&self) -> Outcome<V> {
        let mut state = self.shared.state.lock();
        loop {
            if let State::Done(outcome) = &*state {
                return outcome.clone();
            }
            self.shared.done.wait(&mut state);
        }
    }

    /// Completes the future with `outcome`.
    ///
    /// Returns `false` if it was already complete.  Wakers and callbacks run
    /// on the calling thread after the slot is published.
    pub fn complete_with(&self, outcome: Outcome<V>) -> bool {
        let previous = {
            let mut state = self.shared.state.lock();
            if matches!(*state, State::Done(_)) {
                return false;
            }
            std::mem::replace(&mut *state, State::Done(outcome.clone()))
        };
        self.shared.done.notify_all();
        if let State::Pending { wakers, callbacks } = previous {
            for waker in wakers {
                waker.wake();
            }
            for callback in callbacks {
                callback(&outcome);
            }
        }
        true
    }

    pub fn complete(&self, value: V) -> bool {
        self.complete_with(Ok(Some(Arc::new(value))))
    }

    pub fn complete_exceptionally(&self, err: CacheError) -> bool {
        self.complete_with(Err(err))
    }

    /// Completes the future with [`CacheError::Cancelled`].
    pub fn cancel(&self) -> bool {
        self.complete_with(Err(CacheError::Cancelled))
    }
}

impl<V: Send + Sync + 'static> ValueFuture<V> {
    /// Runs `f` on `executor` and completes the returned future with its
    /// result.
    ///
    /// A panic in `f` fails the future, then resumes on the executor's thread.
    pub fn supply<F>(executor: &dyn Executor, f: F) -> Self
    where
        F: FnOnce() -> Result<Option<V>, BoxError> + Send + 'static,
    {
        let future = ValueFuture::new();
        let promise = future.clone();
        executor.execute(Box::new(move || match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(result) => {
                promise.complete_with(result.map(|v| v.map(Arc::new)).map_err(CacheError::load));
            }
            Err(payload) => {
                promise.complete_exceptionally(CacheError::load("computation panicked"));
                panic::resume_unwind(payload)
            }
        }));
        future
    }

    /// Registers `f` to run once the future completes.
    ///
    /// Runs immediately on the calling thread if it is already complete.
    pub fn on_complete<F>(&self, f: F)
    where
        F: FnOnce(&Outcome<V>) + Send + 'static,
    {
        let outcome = {
            let mut state = self.shared.state.lock();
            match &mut *state {
                State::Pending { callbacks, .. } => {
                    callbacks.push(Box::new(f));
                    return;
                }
                State::Done(outcome) => outcome.clone(),
            }
        };
        f(&outcome);
    }
}

impl<V> Default for ValueFuture<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Future for ValueFuture<V> {
    type Output = Outcome<V>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock();
        match &mut *state {
            State::Done(outcome) => Poll::Ready(outcome.clone()),
            State::Pending { wakers, .. } => {
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl<V: fmt::Debug> fmt::Debug for ValueFuture<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.shared.state.lock() {
            State::Pending { .. } => f.write_str("ValueFuture(<pending>)"),
            State::Done(outcome) => f.debug_tuple("ValueFuture").field(outcome).finish(),
        }
    }
}

/// Combines per-key futures into one future of the present values.
///
/// Fails with the first error any part reports; keys that complete without
/// a value are left out.
pub(crate) fn collect_keyed<K, V>(parts: Vec<(K, ValueFuture<V>)>) -> ValueFuture<HashMap<K, Arc<V>>>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    let combined = ValueFuture::new();
    if parts.is_empty() {
        combined.complete(HashMap::new());
        return combined;
    }
    let remaining = Arc::new(AtomicUsize::new(parts.len()));
    let values = Arc::new(Mutex::new(HashMap::with_capacity(parts.len())));
    for (key, part) in parts {
        let combined = combined.clone();
        let remaining = Arc::clone(&remaining);
        let values = Arc::clone(&values);
        part.on_complete(move |outcome| {
            match outcome {
                Ok(Some(value)) => {
                    values.lock().insert(key, Arc::clone(value));
                }
                Ok(None) => {}
                Err(err) => {
                    combined.complete_exceptionally(err.clone());
                }
            }
            if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                let values = std::mem::take(&mut *values.lock());
                combined.complete(values);
            }
        });
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{SameThreadExecutor, ThreadExecutor};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[test]
    fn completes_once() {
        let future = ValueFuture::new();
        assert!(future.complete(1));
        assert!(!future.complete(2));
        assert!(!future.cancel());
        assert_eq!(*future.peek_value().unwrap(), 1);
    }

    #[test]
    fn clones_share_identity() {
        let a: ValueFuture<u8> = ValueFuture::new();
        let b = a.clone();
        let c: ValueFuture<u8> = ValueFuture::new();
        assert!(ValueFuture::ptr_eq(&a, &b));
        assert!(!ValueFuture::ptr_eq(&a, &c));
    }

    #[test]
    fn cancel_is_terminal() {
        let future: ValueFuture<u8> = ValueFuture::new();
        assert!(future.cancel());
        assert!(future.is_cancelled());
        assert!(future.is_completed_exceptionally());
        assert!(matches!(future.join(), Err(CacheError::Cancelled)));
    }

    #[test]
    fn callback_runs_on_completion_or_immediately() {
        let future: ValueFuture<u8> = ValueFuture::new();
        let seen = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&seen);
        future.on_complete(move |outcome| {
            assert!(matches!(outcome, Ok(None)));
            flag.store(true, Ordering::SeqCst);
        });
        assert!(!seen.load(Ordering::SeqCst));
        future.complete_with(Ok(None));
        assert!(seen.load(Ordering::SeqCst));

        let late = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&late);
        future.on_complete(move |_| flag.store(true, Ordering::SeqCst));
        assert!(late.load(Ordering::SeqCst));
    }

    #[test]
    fn join_waits_for_other_thread() {
        let future: ValueFuture<String> = ValueFuture::new();
        let promise = future.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            promise.complete("done".to_string());
        });
        assert_eq!(*future.join().unwrap().unwrap(), "done");
        handle.join().unwrap();
    }

    #[test]
    fn awaits_with_futures_executor() {
        let future = ValueFuture::supply(&ThreadExecutor::new(), || Ok(Some(41 + 1)));
        let outcome = futures::executor::block_on(future);
        assert_eq!(*outcome.unwrap().unwrap(), 42);
    }

    #[test]
    fn supply_maps_errors_to_load_failures() {
        let future: ValueFuture<u8> = ValueFuture::supply(&SameThreadExecutor, || Err("boom".into()));
        assert!(matches!(future.join(), Err(CacheError::Load(_))));
    }

    #[test]
    fn supply_fails_the_future_when_the_computation_panics() {
        let future: ValueFuture<u8> = ValueFuture::supply(&ThreadExecutor::new(), || panic!("loader bug"));
        assert!(matches!(future.join(), Err(CacheError::Load(_))));
    }

    #[test]
    fn collect_keyed_skips_absent_and_fails_fast() {
        let a = ValueFuture::completed(1);
        let b: ValueFuture<i32> = ValueFuture::absent();
        let c = ValueFuture::new();
        let all = collect_keyed(vec![("a", a), ("b", b), ("c", c.clone())]);
        assert!(!all.is_done());
        c.complete(3);
        let map = all.join().unwrap().unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(*map["a"], 1);
        assert_eq!(*map["c"], 3);

        let failing = ValueFuture::new();
        let all = collect_keyed(vec![(1, ValueFuture::completed(1)), (2, failing.clone())]);
        failing.complete_exceptionally(CacheError::load("nope"));
        assert!(all.is_completed_exceptionally());
    }
}
