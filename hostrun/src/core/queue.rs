//! Pull-based work queue shared by the worker pool.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Pop-only queue of host indices, handed out in inventory order.
///
/// This is the only synchronized mutation point of a run: each index is
/// returned exactly once across all callers.
#[derive(Debug)]
pub struct WorkQueue {
    pending: Mutex<VecDeque<usize>>,
}

impl WorkQueue {
    /// Queue holding `0..len`.
    pub fn new(len: usize) -> Self {
        Self {
            pending: Mutex::new((0..len).collect()),
        }
    }

    /// Take the next unstarted index, or `None` once the queue is drained.
    pub fn pop(&self) -> Option<usize> {
        // A worker that panicked while holding the lock cannot have left the
        // deque half-updated, so the data is still usable.
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
