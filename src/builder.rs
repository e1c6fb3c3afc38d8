//! Builder for constructing validated state graphs.
//!
//! This is the loader boundary: a chart-definition parser (out of scope for
//! this crate) would drive the same fluent API to produce a [`StateGraph`].
//! All structural validation happens in [`GraphBuilder::build`]; the engine
//! assumes a built graph is well-formed.
//!
//! # Example
//!
//! ```rust,ignore
//! use statechart::GraphBuilder;
//!
//! let graph = GraphBuilder::new("process")
//!     .state("idle").initial().done()
//!     .state("busy").initial_child("working").done()
//!     .state("working").parent("busy").done()
//!     .state("halting").parent("busy").done()
//!     .transition("idle", "busy")
//!         .on_action("go")
//!         .done()
//!     .transition("busy", "idle")
//!         .on_action("stop")
//!         .with_guard(|action| action.payload.is_some())
//!         .done()
//!     .build()?;
//! ```

use crate::graph::{State, StateGraph, Transition};
use crate::types::{Action, EngineError, GuardFn, StateId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

struct StateDef {
    id: StateId,
    is_initial: bool,
    parent: Option<StateId>,
    initial_child: Option<StateId>,
}

struct TransitionDef {
    from: StateId,
    to: StateId,
    action_id: Option<String>,
    guard: Option<GuardFn>,
}

/// Builder for constructing state graphs with a fluent API.
pub struct GraphBuilder {
    name: String,
    states: Vec<StateDef>,
    transitions: Vec<TransitionDef>,
}

impl GraphBuilder {
    /// Create a new graph builder.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            states: Vec::new(),
            transitions: Vec::new(),
        }
    }

    /// Declare a state and return its builder.
    pub fn state(self, id: impl Into<StateId>) -> StateBuilder {
        StateBuilder::new(self, id.into())
    }

    /// Declare a transition and return its builder.
    pub fn transition(self, from: impl Into<StateId>, to: impl Into<StateId>) -> TransitionBuilder {
        TransitionBuilder::new(self, from.into(), to.into())
    }

    /// Build and validate the graph.
    ///
    /// Fails when no initial state is declared, state ids collide, a
    /// transition lacks an action id or references an undeclared state, or
    /// the parent hierarchy is malformed.
    pub fn build(self) -> Result<StateGraph, EngineError> {
        let mut ids: HashSet<StateId> = HashSet::new();
        for def in &self.states {
            if !ids.insert(def.id.clone()) {
                return Err(EngineError::DuplicateState(def.id.clone()));
            }
        }

        let initial = {
            let mut initials = self.states.iter().filter(|d| d.is_initial);
            let first = initials.next().ok_or(EngineError::NoInitialState)?;
            if initials.next().is_some() {
                return Err(EngineError::InvalidHierarchy(
                    "multiple initial states declared".to_string(),
                ));
            }
            first.id.clone()
        };

        let mut states: HashMap<StateId, State> = self
            .states
            .iter()
            .map(|def| {
                (
                    def.id.clone(),
                    State {
                        id: def.id.clone(),
                        parent: def.parent.clone(),
                        children: Vec::new(),
                        initial_child: def.initial_child.clone(),
                        transitions: Vec::new(),
                    },
                )
            })
            .collect();

        // Derive child lists from parent declarations, in declaration order.
        for def in &self.states {
            if let Some(parent) = &def.parent {
                if !ids.contains(parent) {
                    return Err(EngineError::UnknownState(parent.clone()));
                }
                if let Some(parent_state) = states.get_mut(parent) {
                    parent_state.children.push(def.id.clone());
                }
            }
        }

        for def in &self.states {
            if let Some(child) = &def.initial_child {
                if !ids.contains(child) {
                    return Err(EngineError::UnknownState(child.clone()));
                }
                let is_child = states
                    .get(&def.id)
                    .map(|s| s.children.contains(child))
                    .unwrap_or(false);
                if !is_child {
                    return Err(EngineError::InvalidHierarchy(format!(
                        "initial child '{}' is not a child of '{}'",
                        child, def.id
                    )));
                }
            }
        }

        // The parent hierarchy must be a tree: walking up from any state has
        // to terminate.
        for def in &self.states {
            let mut seen: HashSet<&StateId> = HashSet::new();
            let mut cursor = def.parent.as_ref();
            seen.insert(&def.id);
            while let Some(parent) = cursor {
                if !seen.insert(parent) {
                    return Err(EngineError::InvalidHierarchy(format!(
                        "parent cycle through state '{}'",
                        parent
                    )));
                }
                cursor = self
                    .states
                    .iter()
                    .find(|d| d.id == *parent)
                    .and_then(|d| d.parent.as_ref());
            }
        }

        for def in self.transitions {
            let action_id = def.action_id.ok_or_else(|| {
                EngineError::InvalidTransition(format!(
                    "transition {} -> {} has no action id",
                    def.from, def.to
                ))
            })?;
            if !ids.contains(&def.to) {
                return Err(EngineError::UnknownState(def.to.clone()));
            }
            let source = states
                .get_mut(&def.from)
                .ok_or_else(|| EngineError::UnknownState(def.from.clone()))?;
            source.transitions.push(Transition {
                source: def.from,
                target: def.to,
                action_id,
                guard: def.guard,
            });
        }

        Ok(StateGraph::new(self.name, states, initial))
    }
}

/// Builder for a single state.
pub struct StateBuilder {
    parent: GraphBuilder,
    def: StateDef,
}

impl StateBuilder {
    fn new(parent: GraphBuilder, id: StateId) -> Self {
        Self {
            parent,
            def: StateDef {
                id,
                is_initial: false,
                parent: None,
                initial_child: None,
            },
        }
    }

    /// Mark this as the machine's initial state.
    pub fn initial(mut self) -> Self {
        self.def.is_initial = true;
        self
    }

    /// Set the parent state (for hierarchical charts).
    pub fn parent(mut self, parent: impl Into<StateId>) -> Self {
        self.def.parent = Some(parent.into());
        self
    }

    /// Designate the child entered by default when this state is entered.
    pub fn initial_child(mut self, child: impl Into<StateId>) -> Self {
        self.def.initial_child = Some(child.into());
        self
    }

    /// Complete this state and return to the graph builder.
    pub fn done(mut self) -> GraphBuilder {
        self.parent.states.push(self.def);
        self.parent
    }
}

/// Builder for a single transition.
pub struct TransitionBuilder {
    parent: GraphBuilder,
    def: TransitionDef,
}

impl TransitionBuilder {
    fn new(parent: GraphBuilder, from: StateId, to: StateId) -> Self {
        Self {
            parent,
            def: TransitionDef {
                from,
                to,
                action_id: None,
                guard: None,
            },
        }
    }

    /// Set the action id that fires this transition.
    pub fn on_action(mut self, action_id: impl Into<String>) -> Self {
        self.def.action_id = Some(action_id.into());
        self
    }

    /// Add a guard over the triggering action.
    pub fn with_guard<F>(mut self, guard: F) -> Self
    where
        F: Fn(&Action) -> bool + Send + Sync + 'static,
    {
        self.def.guard = Some(Arc::new(guard));
        self
    }

    /// Complete this transition and return to the graph builder.
    pub fn done(mut self) -> GraphBuilder {
        self.parent.transitions.push(self.def);
        self.parent
    }
}
