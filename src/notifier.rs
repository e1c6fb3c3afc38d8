//! Observer fan-out for machine events.
//!
//! Observers are invoked synchronously, in subscription order, on the thread
//! that completed the transition. For `StateEntered` that thread still holds
//! the transition lock, so observers must be fast and non-blocking
//! (enqueue-only is the intended pattern); a slow observer extends how long
//! the machine stays busy.

use crate::types::StateId;
use parking_lot::RwLock;
use std::sync::Arc;

/// An event published by the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MachineEvent {
    /// A state became active. Emitted once per completed transition with the
    /// deepest entered state, and once when the machine starts.
    StateEntered(StateId),
    /// An asynchronous entry callback reported failure.
    CallbackFailed { state: StateId, detail: String },
}

/// Type alias for observer callbacks.
pub type ObserverFn = Arc<dyn Fn(&MachineEvent) + Send + Sync>;

/// Multi-observer fan-out.
pub struct Notifier {
    observers: RwLock<Vec<ObserverFn>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
        }
    }

    /// Register an observer. Observers cannot be removed.
    pub fn subscribe<F>(&self, observer: F)
    where
        F: Fn(&MachineEvent) + Send + Sync + 'static,
    {
        self.observers.write().push(Arc::new(observer));
    }

    /// Deliver an event to every observer in subscription order.
    pub fn notify(&self, event: &MachineEvent) {
        // Snapshot first so an observer may itself subscribe without
        // deadlocking on the list lock.
        let observers: Vec<ObserverFn> = self.observers.read().clone();
        for observer in &observers {
            observer(event);
        }
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
