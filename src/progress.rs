//! Progress reporting: throttling, pulse waiting and event observers
//!
//! The engine never assumes anything about how progress is displayed. Two
//! mechanisms are offered:
//!
//! - **Polling**: a caller thread blocks on a task with
//!   [`wait_with_pulse`], which wakes up every poll interval and invokes a
//!   pulse callback at most once per [`Throttle`] interval, plus once more at
//!   completion. The pulse typically reads a
//!   [`StatisticsSnapshot`](crate::stats::StatisticsSnapshot).
//! - **Observers**: an [`EventHub`] fans [`SyncEvent`]s out to subscribers.
//!   Callbacks run on whichever worker produced the event, so they must be
//!   cheap and must not block.
//!
//! ## Example
//!
//! ```rust
//! use treesync::progress::{EventHub, SyncEvent};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let hub = EventHub::new();
//! let copied = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&copied);
//! let id = hub.subscribe(move |event| {
//!     if let SyncEvent::FileCopied { .. } = event {
//!         counter.fetch_add(1, Ordering::Relaxed);
//!     }
//! });
//!
//! hub.emit(&SyncEvent::FileCopied { path: "a.txt".into(), bytes: 3 });
//! assert!(hub.unsubscribe(id));
//! hub.emit(&SyncEvent::FileCopied { path: "b.txt".into(), bytes: 3 });
//!
//! assert_eq!(copied.load(Ordering::Relaxed), 1);
//! ```

use crate::scheduler::Task;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

/// Rate limiter for progress callbacks
///
/// Remembers when it last fired and only fires again once `min_interval` has
/// passed.
#[derive(Debug, Clone)]
pub struct Throttle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    /// Create a throttle that has never fired
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    /// Minimum time between two firings
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Fire if allowed; returns whether the caller should report now
    pub fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    /// Record a firing that bypassed the throttle
    pub fn fire(&mut self) {
        self.last = Some(Instant::now());
    }
}

/// Block until `task` completes, pulsing periodically
///
/// The task is polled with `poll_interval` timeouts. After each timeout
/// `pulse` runs if `throttle` allows it; once the task completes `pulse` runs
/// one final time regardless of the throttle. Must not be called from a worker
/// thread of the scheduler running `task`.
pub fn wait_with_pulse<T, F>(task: &Task<T>, poll_interval: Duration, throttle: &mut Throttle, mut pulse: F)
where
    T: Send + 'static,
    F: FnMut(),
{
    loop {
        if task.wait(poll_interval) {
            throttle.fire();
            pulse();
            trace!("Task {} completed; final pulse sent", task.id());
            return;
        }
        if throttle.ready() {
            pulse();
        }
    }
}

/// Notifications emitted while synchronizing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A destination directory was created
    DirectoryCreated {
        /// Created directory
        path: PathBuf,
    },
    /// A chunk of a file copy was written
    CopyProgress {
        /// Destination file
        path: PathBuf,
        /// Bytes written so far
        transferred: u64,
        /// File size
        total: u64,
    },
    /// A file or link finished copying
    FileCopied {
        /// Destination path
        path: PathBuf,
        /// Bytes written
        bytes: u64,
    },
    /// A file or link was left alone because the destination matched
    FileSkipped {
        /// Destination path
        path: PathBuf,
        /// Size of the skipped file
        bytes: u64,
    },
    /// A destination entry was deleted
    EntryDeleted {
        /// Deleted path
        path: PathBuf,
        /// Whether it was a directory
        directory: bool,
    },
    /// A per-entry failure was recorded
    Error {
        /// Path the failure relates to
        path: PathBuf,
        /// Failure description
        message: String,
    },
}

/// Handle returned by [`EventHub::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Observer = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

/// Multicast dispatcher for [`SyncEvent`]s
#[derive(Default)]
pub struct EventHub {
    observers: RwLock<Vec<(SubscriptionId, Observer)>>,
    next_id: AtomicU64,
}

impl EventHub {
    /// Create a hub with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, Arc::new(observer)));
        id
    }

    /// Remove an observer; returns whether it was registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Whether anyone is listening
    pub fn has_subscribers(&self) -> bool {
        !self.observers.read().is_empty()
    }

    /// Deliver `event` to every current observer
    ///
    /// Observers are called after the registry lock is released, so they may
    /// subscribe or unsubscribe from inside the callback.
    pub fn emit(&self, event: &SyncEvent) {
        let observers: Vec<Observer> = self.observers.read().iter().map(|(_, o)| Arc::clone(o)).collect();
        for observer in observers {
            observer(event);
        }
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.observers.read().len())
            .finish()
    }
}
