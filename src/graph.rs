//! Immutable state graph: states, hierarchy, and transitions.
//!
//! A [`StateGraph`] is produced by the [`GraphBuilder`](crate::GraphBuilder)
//! and never mutated afterwards. The engine only depends on its accessors:
//! state lookup, outgoing transitions, and the designated initial state.
//! Transition edges may form arbitrary cycles (a "retry" loop is expected);
//! only the parent hierarchy is required to be a tree.

use crate::types::{Action, GuardFn, StateId};
use std::collections::{HashMap, HashSet};

/// A transition edge between two states, fired by a specific action id.
#[derive(Clone)]
pub struct Transition {
    /// State this transition leaves from
    pub source: StateId,
    /// State this transition enters
    pub target: StateId,
    /// Action id that fires this transition
    pub action_id: String,
    /// Optional guard over the triggering action
    pub guard: Option<GuardFn>,
}

impl Transition {
    /// Whether this transition fires for the given action.
    pub fn matches(&self, action: &Action) -> bool {
        if self.action_id != action.id {
            return false;
        }
        match &self.guard {
            Some(guard) => guard(action),
            None => true,
        }
    }
}

impl std::fmt::Debug for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transition")
            .field("source", &self.source)
            .field("target", &self.target)
            .field("action_id", &self.action_id)
            .field("has_guard", &self.guard.is_some())
            .finish()
    }
}

/// A node in the chart graph.
#[derive(Clone, Debug)]
pub struct State {
    /// Unique identifier
    pub id: StateId,
    /// Parent state, if nested
    pub parent: Option<StateId>,
    /// Child states in declaration order
    pub children: Vec<StateId>,
    /// Child entered by default when this state is entered
    pub initial_child: Option<StateId>,
    /// Outgoing transitions in declaration order
    pub transitions: Vec<Transition>,
}

/// Immutable-after-build representation of the chart.
pub struct StateGraph {
    name: String,
    states: HashMap<StateId, State>,
    initial: StateId,
}

impl StateGraph {
    pub(crate) fn new(name: String, states: HashMap<StateId, State>, initial: StateId) -> Self {
        Self {
            name,
            states,
            initial,
        }
    }

    /// Name of the chart, used in log output.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a state by id.
    pub fn lookup(&self, id: &StateId) -> Option<&State> {
        self.states.get(id)
    }

    /// Outgoing transitions of a state in declaration order.
    ///
    /// Returns an empty slice for unknown ids.
    pub fn outgoing_transitions(&self, id: &StateId) -> &[Transition] {
        self.states
            .get(id)
            .map(|s| s.transitions.as_slice())
            .unwrap_or(&[])
    }

    /// The state entered when the machine starts.
    pub fn initial_state(&self) -> &StateId {
        &self.initial
    }

    /// All state ids in the graph.
    pub fn state_ids(&self) -> impl Iterator<Item = &StateId> {
        self.states.keys()
    }

    /// Ancestors of a state, nearest first. Empty for top-level states.
    pub fn ancestors(&self, id: &StateId) -> Vec<StateId> {
        let mut chain = Vec::new();
        let mut cursor = self.states.get(id).and_then(|s| s.parent.clone());
        while let Some(parent) = cursor {
            cursor = self.states.get(&parent).and_then(|s| s.parent.clone());
            chain.push(parent);
        }
        chain
    }

    /// Whether `ancestor` is a proper ancestor of `state`.
    pub fn is_ancestor(&self, ancestor: &StateId, state: &StateId) -> bool {
        self.ancestors(state).contains(ancestor)
    }

    /// The chain of designated initial children strictly below `id`.
    ///
    /// Entering a compound state descends into its initial child,
    /// recursively, until a state with no initial child is reached.
    pub fn entry_descent(&self, id: &StateId) -> Vec<StateId> {
        let mut descent = Vec::new();
        let mut cursor = self.states.get(id).and_then(|s| s.initial_child.clone());
        while let Some(child) = cursor {
            cursor = self.states.get(&child).and_then(|s| s.initial_child.clone());
            descent.push(child);
        }
        descent
    }

    /// Full entry path for the machine's initial state: ancestors outside-in,
    /// the initial state itself, then the initial-child descent.
    pub(crate) fn initial_entry_path(&self) -> Vec<StateId> {
        let mut path = self.ancestors(&self.initial);
        path.reverse();
        path.push(self.initial.clone());
        path.extend(self.entry_descent(&self.initial));
        path
    }

    /// Least common ancestor of two states, counting a state as its own
    /// ancestor. `None` when the states sit in disjoint subtrees.
    fn lca(&self, a: &StateId, b: &StateId) -> Option<StateId> {
        let mut b_chain: HashSet<StateId> = HashSet::new();
        b_chain.insert(b.clone());
        b_chain.extend(self.ancestors(b));
        if b_chain.contains(a) {
            return Some(a.clone());
        }
        self.ancestors(a).into_iter().find(|id| b_chain.contains(id))
    }

    /// Exit and entry paths for a transition resolved on `source` while
    /// `current` is the active state, entering `target`.
    ///
    /// The exit path lists states to leave, inside-out. The entry path lists
    /// states to enter, outside-in, ending with the deepest entered state.
    /// The transition's domain comes from `source` and `target`: a
    /// transition declared on an ancestor exits everything below the least
    /// common ancestor of that declaring state and the target, even states
    /// the shorter `current`-to-`target` path would keep. A self-transition
    /// or a transition to an ancestor exits up to and including the target
    /// and then re-enters it.
    ///
    /// `current` must be `source` itself or one of its descendants; action
    /// resolution only ever walks upward.
    pub(crate) fn transition_paths(
        &self,
        current: &StateId,
        source: &StateId,
        target: &StateId,
    ) -> (Vec<StateId>, Vec<StateId>) {
        let mut exit_path = Vec::new();
        let mut entry_path = Vec::new();

        if target == current || self.is_ancestor(target, current) {
            exit_path.push(current.clone());
            for ancestor in self.ancestors(current) {
                let reached_target = ancestor == *target;
                exit_path.push(ancestor);
                if reached_target {
                    break;
                }
            }
            entry_path.push(target.clone());
        } else {
            let domain = self.lca(source, target);
            if domain.as_ref() != Some(current) {
                exit_path.push(current.clone());
                for ancestor in self.ancestors(current) {
                    if Some(&ancestor) == domain.as_ref() {
                        break;
                    }
                    exit_path.push(ancestor);
                }
            }
            for ancestor in self.ancestors(target) {
                if Some(&ancestor) == domain.as_ref() {
                    break;
                }
                entry_path.push(ancestor);
            }
            entry_path.reverse();
            entry_path.push(target.clone());
        }

        entry_path.extend(self.entry_descent(target));
        (exit_path, entry_path)
    }
}

impl std::fmt::Debug for StateGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateGraph")
            .field("name", &self.name)
            .field("initial", &self.initial)
            .field("state_count", &self.states.len())
            .field(
                "transition_count",
                &self
                    .states
                    .values()
                    .map(|s| s.transitions.len())
                    .sum::<usize>(),
            )
            .finish()
    }
}
