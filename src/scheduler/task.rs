//! Single tasks and continuation chaining

use super::Spawner;
use crate::error::{Result, SyncError};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a [`Task`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting for its dependency or for a worker
    Pending,
    /// Executing on a worker thread
    Running,
    /// Finished, successfully or not; terminal
    Completed,
}

type Continuation<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;

struct Slot<T> {
    state: TaskState,
    result: Option<Result<T>>,
    continuation: Option<Continuation<T>>,
}

pub(crate) struct TaskInner<T> {
    id: u64,
    slot: Mutex<Slot<T>>,
    completed: Condvar,
}

/// Handle to a unit of asynchronous work running on a [`Scheduler`](super::Scheduler)
///
/// A task completes exactly once. Its result has exactly one consumer: either
/// the continuation registered through [`then`](Task::then) (or a collection
/// barrier), or the caller of [`join`](Task::join). Both consume the handle,
/// so a second continuation cannot be registered.
pub struct Task<T> {
    inner: Arc<TaskInner<T>>,
    spawner: Spawner,
}

/// Write side of a task, held by whatever will eventually complete it
pub(crate) struct Completer<T> {
    inner: Arc<TaskInner<T>>,
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Completer<T> {
    pub(crate) fn mark_running(&self) {
        let mut slot = self.inner.slot.lock();
        if slot.state == TaskState::Pending {
            slot.state = TaskState::Running;
        }
    }

    /// Store the result and hand it to the continuation, if one is waiting
    ///
    /// The continuation runs on the completing thread after the lock is released.
    pub(crate) fn complete(&self, result: Result<T>) {
        let continuation = {
            let mut slot = self.inner.slot.lock();
            if slot.state == TaskState::Completed {
                return;
            }
            slot.state = TaskState::Completed;
            match slot.continuation.take() {
                Some(continuation) => Some((continuation, result)),
                None => {
                    slot.result = Some(result);
                    None
                }
            }
        };
        self.inner.completed.notify_all();
        if let Some((continuation, result)) = continuation {
            continuation(result);
        }
    }
}

impl<T: Send + 'static> Task<T> {
    pub(crate) fn pending(spawner: Spawner) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id: NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed),
                slot: Mutex::new(Slot {
                    state: TaskState::Pending,
                    result: None,
                    continuation: None,
                }),
                completed: Condvar::new(),
            }),
            spawner,
        }
    }

    pub(crate) fn completer(&self) -> Completer<T> {
        Completer {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Process-unique id, useful in logs
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> TaskState {
        self.inner.slot.lock().state
    }

    /// Whether the task has completed
    pub fn is_completed(&self) -> bool {
        self.state() == TaskState::Completed
    }

    /// Block the calling thread up to `timeout`; returns whether the task completed
    ///
    /// Never call this from a worker thread of the same scheduler.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slot = self.inner.slot.lock();
        while slot.state != TaskState::Completed {
            if self.inner.completed.wait_until(&mut slot, deadline).timed_out() {
                return slot.state == TaskState::Completed;
            }
        }
        true
    }

    /// Block until the task completes and take its result
    pub fn join(self) -> Result<T> {
        let mut slot = self.inner.slot.lock();
        while slot.state != TaskState::Completed {
            self.inner.completed.wait(&mut slot);
        }
        slot.result
            .take()
            .unwrap_or_else(|| Err(SyncError::internal("task result already consumed")))
    }

    /// Register the one continuation of this task
    ///
    /// If the task already completed, `continuation` runs right away on the
    /// calling thread; otherwise it runs on whichever thread completes the task.
    /// The check and the registration happen under the same lock, so a
    /// registration racing with completion is never lost.
    pub(crate) fn on_complete<F>(self, continuation: F)
    where
        F: FnOnce(Result<T>) + Send + 'static,
    {
        let result = {
            let mut slot = self.inner.slot.lock();
            if slot.state != TaskState::Completed {
                slot.continuation = Some(Box::new(continuation));
                return;
            }
            slot.result
                .take()
                .unwrap_or_else(|| Err(SyncError::internal("task result already consumed")))
        };
        continuation(result);
    }

    /// Run `f` on the pool once this task completes
    ///
    /// `f` receives this task's result, including a failure, and its own
    /// result becomes the result of the returned task.
    pub fn then<U, F>(self, f: F) -> Task<U>
    where
        U: Send + 'static,
        F: FnOnce(Result<T>) -> Result<U> + Send + 'static,
    {
        let next = Task::pending(self.spawner.clone());
        let completer = next.completer();
        let spawner = self.spawner.clone();
        self.on_complete(move |result| {
            spawner.run(completer, move || f(result));
        });
        next
    }
}

impl<U: Send + 'static> Task<Task<U>> {
    /// Collapse a task that produces a task into one that completes with the inner result
    ///
    /// No worker thread blocks while the inner task runs.
    pub fn flatten(self) -> Task<U> {
        let next = Task::pending(self.spawner.clone());
        let completer = next.completer();
        self.on_complete(move |outer| match outer {
            Ok(inner) => inner.on_complete(move |result| completer.complete(result)),
            Err(e) => completer.complete(Err(e)),
        });
        next
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("state", &self.inner.slot.lock().state)
            .finish()
    }
}
