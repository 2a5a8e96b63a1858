//! Exactly-once completion slots and the registry that anchors them.
//!
//! # Design
//! A `PendingOperation` wraps a oneshot sender behind a mutex. Whoever takes
//! the sender first settles the operation; every later attempt is refused.
//! This is what resolves races between a native completion, a native
//! failure, and the caller's cancellation to a single outcome.
//!
//! Engines that keep only an indirect handle to an in-flight call (an
//! integer token across an FFI boundary, say) need something to hold the
//! completion state alive until it fires. `PendingRegistry` is that anchor:
//! entries are inserted under a lock and removed by a guard on every exit
//! path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique operation id.
fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// An in-flight operation awaiting exactly one outcome.
#[derive(Debug)]
pub struct PendingOperation<T> {
    id: u64,
    slot: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> PendingOperation<T> {
    /// Create an operation and the receiver its outcome will arrive on.
    pub fn new() -> (Arc<Self>, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        let op = Arc::new(Self {
            id: next_id(),
            slot: Mutex::new(Some(tx)),
        });
        (op, rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Settle the operation. Returns `true` only for the first caller.
    ///
    /// A first caller whose receiver has already gone still wins; the
    /// outcome is dropped.
    pub fn complete(&self, outcome: T) -> bool {
        let Some(tx) = self.slot.lock().take() else {
            return false;
        };
        let _ = tx.send(outcome);
        true
    }

    pub fn is_settled(&self) -> bool {
        self.slot.lock().is_none()
    }
}

/// Mutex-guarded set of anchored entries, keyed by id.
#[derive(Debug)]
pub struct PendingRegistry<T> {
    entries: Mutex<HashMap<u64, T>>,
}

impl<T> Default for PendingRegistry<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<T> PendingRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold `value` until the returned guard is dropped.
    pub fn anchor(&self, id: u64, value: T) -> Anchor<'_, T> {
        self.entries.lock().insert(id, value);
        Anchor { registry: self, id }
    }

    /// Remove and return an entry ahead of its guard.
    pub fn take(&self, id: u64) -> Option<T> {
        self.entries.lock().remove(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes its entry from the registry when dropped.
#[must_use = "the entry is removed as soon as the anchor is dropped"]
#[derive(Debug)]
pub struct Anchor<'a, T> {
    registry: &'a PendingRegistry<T>,
    id: u64,
}

impl<T> Anchor<'_, T> {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<T> Drop for Anchor<'_, T> {
    fn drop(&mut self) {
        self.registry.entries.lock().remove(&self.id);
    }
}
