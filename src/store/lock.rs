//! Named async mutexes with FIFO hand-off.
//!
//! A [`LockTable`] maps a lock name to the queue of tasks waiting for it.
//! A name with no entry is free. Acquiring a free name inserts an empty
//! queue and returns at once; acquiring a held name parks the caller at the
//! tail of the queue. Releasing hands the lock directly to the oldest live
//! waiter, or removes the entry when nobody is waiting.
//!
//! Ownership is represented by [`LockGuard`], which releases on drop, so a
//! lock is given back on every exit path including `?` and panics.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::trace;

type Waiters = VecDeque<oneshot::Sender<()>>;

/// Process-local table of named locks. Cloning shares the table.
pub struct LockTable<K> {
    slots: Arc<Mutex<HashMap<K, Waiters>>>,
}

impl<K> Clone for LockTable<K> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<K> Default for LockTable<K> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K> LockTable<K>
where
    K: Eq + Hash + Clone + fmt::Display + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `key` is exclusively ours.
    ///
    /// Dropping the returned future before it completes gives up the place
    /// in line; if ownership was handed over in the meantime it is passed on.
    pub async fn acquire(&self, key: K) -> LockGuard<K> {
        let started = Instant::now();
        let waiter = {
            let mut slots = self.slots.lock();
            match slots.entry(key.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(VecDeque::new());
                    None
                }
                Entry::Occupied(mut slot) => {
                    let (tx, rx) = oneshot::channel();
                    slot.get_mut().push_back(tx);
                    Some(rx)
                }
            }
        };

        if let Some(rx) = waiter {
            let mut pending = PendingAcquire {
                table: self.clone(),
                key: Some(key.clone()),
                rx,
            };
            pending.wait().await;
            trace!(lock = %key, waited_us = started.elapsed().as_micros() as u64, "lock handed over");
        }

        LockGuard {
            table: self.clone(),
            key: Some(key),
        }
    }

    /// Acquire several locks in ascending key order.
    ///
    /// Duplicates are collapsed. Every caller that takes more than one lock
    /// goes through here, so all multi-lock holders agree on one order and
    /// cannot form a wait cycle.
    pub async fn acquire_many(&self, mut keys: Vec<K>) -> LockSet<K>
    where
        K: Ord,
    {
        keys.sort();
        keys.dedup();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.acquire(key).await);
        }
        LockSet { guards }
    }

    /// Whether `key` currently has a holder.
    pub fn is_held(&self, key: &K) -> bool {
        self.slots.lock().contains_key(key)
    }

    /// Number of names currently held.
    pub fn held_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Number of tasks parked behind the holder of `key`.
    pub fn waiting_on(&self, key: &K) -> usize {
        self.slots.lock().get(key).map_or(0, VecDeque::len)
    }

    fn release(&self, key: &K) {
        let mut slots = self.slots.lock();
        let Some(waiters) = slots.get_mut(key) else {
            return;
        };
        // Skip waiters that gave up; their receivers are closed.
        while let Some(next) = waiters.pop_front() {
            if next.send(()).is_ok() {
                return;
            }
        }
        slots.remove(key);
    }
}

/// A parked acquisition. Cleans up after itself if dropped mid-wait.
struct PendingAcquire<K>
where
    K: Eq + Hash + Clone + fmt::Display + Send + 'static,
{
    table: LockTable<K>,
    key: Option<K>,
    rx: oneshot::Receiver<()>,
}

impl<K> PendingAcquire<K>
where
    K: Eq + Hash + Clone + fmt::Display + Send + 'static,
{
    async fn wait(&mut self) {
        // A queued sender is only dropped after it has been sent on, so an
        // error here cannot mean "lock lost"; either way the lock is ours.
        let _ = (&mut self.rx).await;
        self.key = None;
    }
}

impl<K> Drop for PendingAcquire<K>
where
    K: Eq + Hash + Clone + fmt::Display + Send + 'static,
{
    fn drop(&mut self) {
        let Some(key) = self.key.take() else {
            return;
        };
        self.rx.close();
        // Handed over between the last poll and now: pass it on.
        if self.rx.try_recv().is_ok() {
            self.table.release(&key);
        }
    }
}

/// Exclusive ownership of one lock name. Releases on drop.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<K>
where
    K: Eq + Hash + Clone + fmt::Display + Send + 'static,
{
    table: LockTable<K>,
    key: Option<K>,
}

impl<K> Drop for LockGuard<K>
where
    K: Eq + Hash + Clone + fmt::Display + Send + 'static,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.table.release(&key);
        }
    }
}

/// Several guards taken in order. Releases in reverse order on drop.
#[must_use = "the locks are released as soon as the set is dropped"]
pub struct LockSet<K>
where
    K: Eq + Hash + Clone + fmt::Display + Send + 'static,
{
    guards: Vec<LockGuard<K>>,
}

impl<K> LockSet<K>
where
    K: Eq + Hash + Clone + fmt::Display + Send + 'static,
{
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

impl<K> Drop for LockSet<K>
where
    K: Eq + Hash + Clone + fmt::Display + Send + 'static,
{
    fn drop(&mut self) {
        while let Some(guard) = self.guards.pop() {
            drop(guard);
        }
    }
}
