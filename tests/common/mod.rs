#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lungo::{Cancellable, Executor, RemovalCause, RemovalListener, Scheduler, Task};

/// Records every removal notification in delivery order.  Clones share the
/// same log.
pub struct RecordingListener<K, V> {
    events: Arc<Mutex<Vec<(K, Arc<V>, RemovalCause)>>>,
}

impl<K, V> Clone for RecordingListener<K, V> {
    fn clone(&self) -> Self {
        RecordingListener {
            events: Arc::clone(&self.events),
        }
    }
}

impl<K, V> RecordingListener<K, V> {
    pub fn new() -> Self {
        RecordingListener {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn causes(&self) -> Vec<RemovalCause> {
        self.events.lock().unwrap().iter().map(|(_, _, c)| *c).collect()
    }
}

impl<K: Clone, V> RecordingListener<K, V> {
    pub fn events(&self) -> Vec<(K, Arc<V>, RemovalCause)> {
        self.events.lock().unwrap().clone()
    }
}

impl<K, V> RemovalListener<K, V> for RecordingListener<K, V>
where
    K: Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn on_removal(&self, key: &K, value: Arc<V>, cause: RemovalCause) {
        self.events.lock().unwrap().push((key.clone(), value, cause));
    }
}

/// A scheduler that never runs anything on its own.  Tests inspect the
/// requested delays and fire the tasks by hand.
#[derive(Clone, Default)]
pub struct CapturingScheduler {
    scheduled: Arc<Mutex<Vec<Captured>>>,
}

struct Captured {
    delay: Duration,
    executor: Arc<dyn Executor>,
    task: Option<Task>,
    state: Arc<HandleState>,
}

#[derive(Default)]
struct HandleState {
    cancelled: AtomicBool,
    done: AtomicBool,
}

struct CapturedHandle {
    state: Arc<HandleState>,
}

impl Cancellable for CapturedHandle {
    fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::SeqCst);
        self.state.done.store(true, Ordering::SeqCst);
    }

    fn is_done(&self) -> bool {
        self.state.done.load(Ordering::SeqCst)
    }
}

impl CapturingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of schedule calls so far.
    pub fn calls(&self) -> usize {
        self.scheduled.lock().unwrap().len()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.scheduled.lock().unwrap().iter().map(|c| c.delay).collect()
    }

    /// Runs every task that was neither run nor cancelled; returns how many
    /// ran.
    pub fn run_pending(&self) -> usize {
        let due: Vec<(Arc<dyn Executor>, Task)> = {
            let mut scheduled = self.scheduled.lock().unwrap();
            scheduled
                .iter_mut()
                .filter(|c| !c.state.cancelled.load(Ordering::SeqCst))
                .filter_map(|c| {
                    let task = c.task.take()?;
                    c.state.done.store(true, Ordering::SeqCst);
                    Some((Arc::clone(&c.executor), task))
                })
                .collect()
        };
        let ran = due.len();
        for (executor, task) in due {
            executor.execute(task);
        }
        ran
    }
}

impl Scheduler for CapturingScheduler {
    fn schedule(&self, executor: Arc<dyn Executor>, task: Task, delay: Duration) -> Box<dyn Cancellable> {
        let state = Arc::new(HandleState::default());
        self.scheduled.lock().unwrap().push(Captured {
            delay,
            executor,
            task: Some(task),
            state: Arc::clone(&state),
        });
        Box::new(CapturedHandle { state })
    }
}
