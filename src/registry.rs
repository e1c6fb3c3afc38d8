//! Per-state entry and exit callback registration.
//!
//! Callbacks are registered against a built [`StateGraph`] before the
//! machine is loaded; registration against an unknown state id fails. The
//! registry is read-only once handed to the engine, so dispatch needs no
//! locking.

use crate::graph::StateGraph;
use crate::types::{Action, DispatchMode, EngineError, EntryCallbackFn, ExitCallbackFn, StateId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// An entry callback together with its dispatch mode.
#[derive(Clone)]
pub struct EntryCallback {
    /// Whether the callback runs inline or on its own thread
    pub mode: DispatchMode,
    /// The callback itself
    pub func: EntryCallbackFn,
}

/// Ordered entry/exit callbacks keyed by state id.
pub struct CallbackRegistry {
    known_states: HashSet<StateId>,
    entry: HashMap<StateId, Vec<EntryCallback>>,
    exit: HashMap<StateId, Vec<ExitCallbackFn>>,
}

impl CallbackRegistry {
    /// Create a registry accepting the states of the given graph.
    pub fn new(graph: &StateGraph) -> Self {
        Self {
            known_states: graph.state_ids().cloned().collect(),
            entry: HashMap::new(),
            exit: HashMap::new(),
        }
    }

    /// Register an entry callback for a state.
    ///
    /// Callbacks run in registration order when the state is entered.
    /// `Sync` callbacks run inline under the transition lock and their
    /// failure is reported to the caller of the transition; `Async`
    /// callbacks are dispatched to their own thread and the transition does
    /// not wait for them.
    pub fn add_entry_callback<F>(
        &mut self,
        state: impl Into<StateId>,
        mode: DispatchMode,
        callback: F,
    ) -> Result<(), EngineError>
    where
        F: Fn(&Action) -> Result<(), String> + Send + Sync + 'static,
    {
        let state = self.validate(state)?;
        self.entry.entry(state).or_default().push(EntryCallback {
            mode,
            func: Arc::new(callback),
        });
        Ok(())
    }

    /// Register an exit callback for a state.
    ///
    /// Exit callbacks always run synchronously, in registration order,
    /// before the state is left. Teardown is best-effort: they cannot fail.
    pub fn add_exit_callback<F>(
        &mut self,
        state: impl Into<StateId>,
        callback: F,
    ) -> Result<(), EngineError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let state = self.validate(state)?;
        self.exit.entry(state).or_default().push(Arc::new(callback));
        Ok(())
    }

    /// Entry callbacks of a state in registration order.
    pub fn entry_callbacks(&self, state: &StateId) -> &[EntryCallback] {
        self.entry.get(state).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Exit callbacks of a state in registration order.
    pub fn exit_callbacks(&self, state: &StateId) -> &[ExitCallbackFn] {
        self.exit.get(state).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn validate(&self, state: impl Into<StateId>) -> Result<StateId, EngineError> {
        let state = state.into();
        if !self.known_states.contains(&state) {
            return Err(EngineError::UnknownState(state));
        }
        Ok(state)
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("entry_count", &self.entry.values().map(Vec::len).sum::<usize>())
            .field("exit_count", &self.exit.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}
