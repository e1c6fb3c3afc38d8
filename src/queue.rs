//! Thread-safe FIFO of pending actions.
//!
//! The queue is the mechanism that lets a callback schedule a follow-up
//! transition from inside the transition lock it currently holds:
//! [`post`](ActionQueue::post) never blocks and never touches the lock, so
//! it is safe to call from anywhere.

use crate::types::Action;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

struct QueueInner {
    items: VecDeque<Action>,
    closed: bool,
}

/// Unbounded FIFO of actions with a blocking consumer side.
pub struct ActionQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueue an action. Never blocks, always succeeds.
    pub fn post(&self, action: Action) {
        let mut inner = self.inner.lock();
        inner.items.push_back(action);
        drop(inner);
        self.available.notify_one();
    }

    /// Block until an action is available or the queue is closed.
    ///
    /// Returns `None` once the queue has been closed; this is the shutdown
    /// sentinel for the consumer loop. Actions still queued at close time
    /// are not delivered.
    pub fn pop_blocking(&self) -> Option<Action> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return None;
            }
            if let Some(action) = inner.items.pop_front() {
                return Some(action);
            }
            self.available.wait(&mut inner);
        }
    }

    /// Close the queue and wake every blocked consumer.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.available.notify_all();
    }

    /// Reopen a closed queue so the machine can be restarted.
    pub fn reopen(&self) {
        self.inner.lock().closed = false;
    }

    /// Drop all pending actions.
    pub fn clear(&self) {
        self.inner.lock().items.clear();
    }

    /// Number of pending actions.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ActionQueue {
    fn default() -> Self {
        Self::new()
    }
}
