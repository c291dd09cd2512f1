//! Task groups with a run-once fan-in barrier

use super::task::Task;
use super::{Scheduler, Spawner};
use crate::error::{Result, SyncError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Atomic countdown whose final arrival is observed by exactly one caller
#[derive(Debug)]
pub(crate) struct Countdown {
    remaining: AtomicUsize,
}

impl Countdown {
    pub(crate) fn new(count: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
        }
    }

    /// Record one arrival; returns `true` only for the arrival that reaches zero
    pub(crate) fn arrive(&self) -> bool {
        self.remaining.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

/// A group of tasks that can be continued as one
///
/// Members may complete in any order and on any worker; the continuation
/// registered with [`then_all`](TaskCollection::then_all) is enqueued exactly
/// once, by whichever completion brings the countdown to zero.
pub struct TaskCollection<T> {
    tasks: Vec<Task<T>>,
    spawner: Spawner,
}

impl<T: Send + 'static> TaskCollection<T> {
    /// Create an empty collection bound to `scheduler`
    pub fn new(scheduler: &Scheduler) -> Self {
        Self::with_spawner(scheduler.spawner().clone())
    }

    pub(crate) fn with_spawner(spawner: Spawner) -> Self {
        Self {
            tasks: Vec::new(),
            spawner,
        }
    }

    /// Add a member task
    pub fn push(&mut self, task: Task<T>) {
        self.tasks.push(task);
    }

    /// Number of member tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the collection has no members
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run `f` on the pool once every member has completed
    ///
    /// `f` receives the members' results in the order they were pushed. An
    /// empty collection enqueues `f` immediately with an empty vector.
    pub fn then_all<U, F>(self, f: F) -> Task<U>
    where
        U: Send + 'static,
        F: FnOnce(Vec<Result<T>>) -> Result<U> + Send + 'static,
    {
        let next = Task::pending(self.spawner.clone());
        let completer = next.completer();

        if self.tasks.is_empty() {
            self.spawner.run(completer, move || f(Vec::new()));
            return next;
        }

        let count = self.tasks.len();
        let barrier = Arc::new(Barrier {
            countdown: Countdown::new(count),
            results: Mutex::new((0..count).map(|_| None).collect()),
            action: Mutex::new(Some((f, completer))),
        });

        for (index, task) in self.tasks.into_iter().enumerate() {
            let barrier = Arc::clone(&barrier);
            let spawner = self.spawner.clone();
            task.on_complete(move |result| {
                barrier.results.lock()[index] = Some(result);
                if !barrier.countdown.arrive() {
                    return;
                }
                let results: Vec<Result<T>> = barrier
                    .results
                    .lock()
                    .drain(..)
                    .map(|slot| slot.unwrap_or_else(|| Err(SyncError::internal("missing member result"))))
                    .collect();
                if let Some((f, completer)) = barrier.action.lock().take() {
                    spawner.run(completer, move || f(results));
                }
            });
        }
        next
    }
}

struct Barrier<T, F, U> {
    countdown: Countdown,
    results: Mutex<Vec<Option<Result<T>>>>,
    action: Mutex<Option<(F, super::task::Completer<U>)>>,
}

impl<T> std::fmt::Debug for TaskCollection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskCollection").field("len", &self.tasks.len()).finish()
    }
}
