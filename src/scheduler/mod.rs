//! Minimal futures-with-continuations runtime
//!
//! The scheduler owns a fixed pool of worker threads that pull jobs from one
//! shared blocking queue and run each to completion. On top of it sit:
//!
//! - [`Task`]: the handle for one unit of work, with [`Task::then`] for ordered
//!   chaining and [`Task::flatten`] for continuations that spawn more work;
//! - [`TaskCollection`]: a group of tasks with a fan-in barrier,
//!   [`TaskCollection::then_all`], that fires exactly once after every member
//!   has completed.
//!
//! A job is enqueued exactly once: at submission, or at the moment its last
//! dependency completes. Workers never block waiting on other tasks; only
//! caller threads use [`Task::wait`] and [`Task::join`].
//!
//! ## Failure handling
//!
//! Errors returned by work functions and panics raised inside them are
//! captured as the task's result ([`SyncError::TaskPanicked`] for panics). They
//! reach the continuation as a failed predecessor and never take down a worker.
//!
//! ## Example
//!
//! ```rust
//! use treesync::scheduler::{Scheduler, TaskCollection};
//!
//! # fn main() -> treesync::Result<()> {
//! let scheduler = Scheduler::new(4)?;
//!
//! let mut squares = TaskCollection::new(&scheduler);
//! for n in 1..=4u64 {
//!     squares.push(scheduler.submit(move || Ok(n * n)));
//! }
//! let total = squares
//!     .then_all(|results| results.into_iter().sum::<treesync::Result<u64>>())
//!     .join()?;
//!
//! assert_eq!(total, 30);
//! # Ok(())
//! # }
//! ```

mod collection;
mod task;

pub use collection::TaskCollection;
pub use task::{Task, TaskState};

use crate::error::{Result, SyncError};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use task::Completer;
use tracing::{debug, trace, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Shutdown,
}

/// Shutdown bookkeeping shared by the scheduler and every spawner
///
/// Workers are told to stop only once the scheduler is closed and no job is
/// in flight. A job counts from the moment it is sent until its task has
/// completed, so continuations it enqueues are counted before it is released.
struct Lifecycle {
    in_flight: AtomicUsize,
    closed: AtomicBool,
    stopped: AtomicBool,
    workers: usize,
}

/// Cheap handle for enqueueing jobs, shared by every task of one scheduler
#[derive(Clone)]
pub(crate) struct Spawner {
    sender: Sender<Message>,
    busy_nanos: Arc<AtomicU64>,
    lifecycle: Arc<Lifecycle>,
}

impl Spawner {
    /// Enqueue `work` and complete `completer` with its outcome
    pub(crate) fn run<T, F>(&self, completer: Completer<T>, work: F)
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let previous = self.lifecycle.in_flight.fetch_add(1, Ordering::SeqCst);
        if self.lifecycle.stopped.load(Ordering::SeqCst)
            || (previous == 0 && self.lifecycle.closed.load(Ordering::SeqCst))
        {
            trace!("Scheduler already drained; failing task");
            completer.complete(Err(SyncError::SchedulerShutdown));
            self.finish_job();
            return;
        }

        let fallback = completer.clone();
        let busy_nanos = Arc::clone(&self.busy_nanos);
        let spawner = self.clone();
        let job: Job = Box::new(move || {
            completer.mark_running();
            let start = Instant::now();
            let result = match panic::catch_unwind(AssertUnwindSafe(work)) {
                Ok(result) => result,
                Err(payload) => Err(SyncError::TaskPanicked(panic_message(payload.as_ref()))),
            };
            busy_nanos.fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
            completer.complete(result);
            spawner.finish_job();
        });
        if self.sender.send(Message::Run(job)).is_err() {
            warn!("Scheduler queue closed; failing task");
            fallback.complete(Err(SyncError::SchedulerShutdown));
            self.finish_job();
        }
    }

    fn finish_job(&self) {
        if self.lifecycle.in_flight.fetch_sub(1, Ordering::SeqCst) == 1
            && self.lifecycle.closed.load(Ordering::SeqCst)
        {
            self.stop_workers();
        }
    }

    /// Refuse new work once every in-flight job has finished
    fn close(&self) {
        self.lifecycle.closed.store(true, Ordering::SeqCst);
        if self.lifecycle.in_flight.load(Ordering::SeqCst) == 0 {
            self.stop_workers();
        }
    }

    fn stop_workers(&self) {
        if self.lifecycle.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        for _ in 0..self.lifecycle.workers {
            let _ = self.sender.send(Message::Shutdown);
        }
    }

    /// Queue `work` as a new task
    pub(crate) fn submit<T, F>(&self, work: F) -> Task<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let task = Task::pending(self.clone());
        self.run(task.completer(), work);
        task
    }

    /// Cumulative time workers have spent running jobs
    pub(crate) fn busy_time(&self) -> Duration {
        Duration::from_nanos(self.busy_nanos.load(Ordering::Relaxed))
    }

    /// A task that is already completed with `result`
    pub(crate) fn ready<T: Send + 'static>(&self, result: Result<T>) -> Task<T> {
        let task = Task::pending(self.clone());
        task.completer().complete(result);
        task
    }
}

/// Fixed-size worker pool with a shared blocking job queue
pub struct Scheduler {
    spawner: Spawner,
    workers: Vec<JoinHandle<()>>,
    worker_ids: Vec<ThreadId>,
}

impl Scheduler {
    /// Start a pool with `workers` threads (minimum 1)
    pub fn new(workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let (sender, receiver) = unbounded::<Message>();
        let busy_nanos = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("treesync-worker-{}", index))
                .spawn(move || worker_loop(receiver))
                .map_err(|e| SyncError::ThreadPool(format!("failed to spawn worker {}: {}", index, e)))?;
            handles.push(handle);
        }
        debug!("Started scheduler with {} workers", workers);

        let worker_ids = handles.iter().map(|h| h.thread().id()).collect();
        Ok(Self {
            spawner: Spawner {
                sender,
                busy_nanos,
                lifecycle: Arc::new(Lifecycle {
                    in_flight: AtomicUsize::new(0),
                    closed: AtomicBool::new(false),
                    stopped: AtomicBool::new(false),
                    workers,
                }),
            },
            workers: handles,
            worker_ids,
        })
    }

    /// Start a pool sized to the available CPU parallelism
    pub fn with_default_workers() -> Result<Self> {
        Self::new(num_cpus::get())
    }

    /// Number of worker threads
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Total time workers have spent running jobs
    pub fn busy_time(&self) -> Duration {
        self.spawner.busy_time()
    }

    /// Queue `work` and return its task
    pub fn submit<T, F>(&self, work: F) -> Task<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        self.spawner.submit(work)
    }

    /// A task that has already completed with `value`
    pub fn ready<T: Send + 'static>(&self, value: T) -> Task<T> {
        self.spawner.ready(Ok(value))
    }

    pub(crate) fn spawner(&self) -> &Spawner {
        &self.spawner
    }
}

impl Drop for Scheduler {
    /// Let queued jobs and the continuations they release drain, then stop
    /// and join the workers
    fn drop(&mut self) {
        self.spawner.close();
        let current = thread::current().id();
        if self.worker_ids.contains(&current) {
            warn!("Scheduler dropped from one of its own workers; not joining");
            return;
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!("Scheduler worker exited with a panic");
            }
        }
        trace!("Scheduler workers joined");
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("workers", &self.workers.len())
            .field("busy_time", &self.busy_time())
            .finish()
    }
}

fn worker_loop(receiver: Receiver<Message>) {
    for message in receiver.iter() {
        match message {
            Message::Run(job) => job(),
            Message::Shutdown => break,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
