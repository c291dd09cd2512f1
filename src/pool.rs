//! Reusable entry-list buffers
//!
//! Every directory visit lists the children of a source and a destination
//! directory. Under heavy fan-out that is a lot of short-lived `Vec<Entry>`
//! allocations, so the synchronizer borrows its lists from an
//! [`EntryListPool`] instead. A borrowed list comes back to the pool, emptied,
//! when its [`PooledEntries`] guard is dropped.
//!
//! The pool retains at most `max_retained` lists and never hands out the
//! same list twice; a borrow owns its list outright until it is returned.

use crate::entry::Entry;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Initial capacity of a freshly allocated list
const INITIAL_CAPACITY: usize = 64;

/// Lists above this capacity are dropped instead of retained
const MAX_RETAINED_CAPACITY: usize = 16 * 1024;

/// Thread-safe pool of `Vec<Entry>` scratch lists
#[derive(Debug)]
pub struct EntryListPool {
    lists: Mutex<Vec<Vec<Entry>>>,
    max_retained: usize,
}

impl EntryListPool {
    /// Create a pool that keeps at most `max_retained` idle lists
    pub fn new(max_retained: usize) -> Self {
        Self {
            lists: Mutex::new(Vec::with_capacity(max_retained)),
            max_retained,
        }
    }

    /// Borrow an empty list; it returns to the pool when the guard drops
    pub fn acquire(pool: &Arc<Self>) -> PooledEntries {
        let list = pool
            .lists
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(INITIAL_CAPACITY));
        PooledEntries {
            list,
            pool: Arc::clone(pool),
        }
    }

    /// Number of idle lists currently retained
    pub fn available(&self) -> usize {
        self.lists.lock().len()
    }

    fn release(&self, mut list: Vec<Entry>) {
        if list.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        list.clear();
        let mut lists = self.lists.lock();
        if lists.len() < self.max_retained {
            lists.push(list);
        }
    }
}

impl Default for EntryListPool {
    /// Retain two lists per CPU: one source and one destination listing each
    fn default() -> Self {
        Self::new(num_cpus::get() * 2)
    }
}

/// Borrowed entry list; derefs to `Vec<Entry>`
#[derive(Debug)]
pub struct PooledEntries {
    list: Vec<Entry>,
    pool: Arc<EntryListPool>,
}

impl Deref for PooledEntries {
    type Target = Vec<Entry>;

    fn deref(&self) -> &Self::Target {
        &self.list
    }
}

impl DerefMut for PooledEntries {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.list
    }
}

impl Drop for PooledEntries {
    fn drop(&mut self) {
        let list = std::mem::take(&mut self.list);
        self.pool.release(list);
    }
}
