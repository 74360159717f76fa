//! Single-assignment rendezvous cell.
//!
//! A [`RendezvousCell`] is written exactly once and may be awaited by any
//! number of threads. Clones share the same slot, so a watcher can hand a
//! clone to the consumer (inside a `wait` instruction) and resolve its own
//! copy later from a timer thread.
//!
//! Waiting parks the calling thread on a condition variable; nothing here
//! polls.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Slot<T> {
    value: Mutex<Option<T>>,
    resolved: Condvar,
}

/// One-shot synchronization object: resolved once, awaited by many.
pub struct RendezvousCell<T = ()> {
    slot: Arc<Slot<T>>,
}

impl<T> Clone for RendezvousCell<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> fmt::Debug for RendezvousCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendezvousCell")
            .field("resolved", &self.slot.value.lock().is_some())
            .finish()
    }
}

impl<T: Clone> Default for RendezvousCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> RendezvousCell<T> {
    /// Create an unresolved cell.
    pub fn new() -> Self {
        Self {
            slot: Arc::new(Slot {
                value: Mutex::new(None),
                resolved: Condvar::new(),
            }),
        }
    }

    /// Create a cell that is already resolved with `value`.
    pub fn resolved(value: T) -> Self {
        Self {
            slot: Arc::new(Slot {
                value: Mutex::new(Some(value)),
                resolved: Condvar::new(),
            }),
        }
    }

    /// Resolve the cell, waking every waiter.
    ///
    /// Returns `false` (and leaves the stored value alone) if the cell was
    /// already resolved.
    pub fn resolve(&self, value: T) -> bool {
        let mut slot = self.slot.value.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        self.slot.resolved.notify_all();
        true
    }

    /// Whether the cell has been resolved.
    pub fn is_resolved(&self) -> bool {
        self.slot.value.lock().is_some()
    }

    /// The resolved value, if any, without blocking.
    pub fn try_get(&self) -> Option<T> {
        let slot = self.slot.value.lock();
        (*slot).clone()
    }

    /// Block until the cell is resolved and return its value.
    pub fn wait(&self) -> T {
        let mut slot = self.slot.value.lock();
        loop {
            if let Some(value) = slot.as_ref() {
                return value.clone();
            }
            self.slot.resolved.wait(&mut slot);
        }
    }

    /// Block for at most `timeout`. Returns `None` if the cell is still
    /// unresolved when the deadline passes.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.value.lock();
        loop {
            if let Some(value) = slot.as_ref() {
                return Some(value.clone());
            }
            if self
                .slot
                .resolved
                .wait_until(&mut slot, deadline)
                .timed_out()
            {
                return (*slot).clone();
            }
        }
    }

    /// Whether two handles refer to the same cell.
    pub fn same_cell(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}
