//! Core types for the statechart engine.
//!
//! # Key Concepts
//!
//! - **State**: A discrete mode the machine can be in, possibly nested
//!   inside a parent state
//! - **Action**: An input that may trigger a transition, optionally carrying
//!   an opaque payload
//! - **Transition**: A rule for moving from one state to another, fired by a
//!   specific action id and optionally gated by a guard
//! - **Entry/Exit callback**: User code invoked when a state becomes active
//!   or inactive

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Unique identifier for a state.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateId(String);

impl StateId {
    /// Create a state ID from a name.
    pub fn new(name: impl Into<String>) -> Self {
        StateId(name.into())
    }

    /// Get the name of the state.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StateId {
    fn from(s: &str) -> Self {
        StateId(s.to_string())
    }
}

impl From<String> for StateId {
    fn from(s: String) -> Self {
        StateId(s)
    }
}

/// An action that can trigger state transitions.
///
/// Actions are consumed exactly once by the engine, either through
/// [`execute`](crate::StateMachine::execute) or by the queue consumer after
/// being [`post`](crate::StateMachine::post)ed. The payload is opaque to the
/// engine and only ever inspected by transition guards and entry callbacks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Action identifier, matched against transition action ids
    pub id: String,
    /// Optional opaque payload
    pub payload: Option<serde_json::Value>,
}

impl Action {
    /// Create a new action with no payload.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            payload: None,
        }
    }

    /// Create an action carrying a payload.
    pub fn with_payload(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            payload: Some(payload),
        }
    }

    /// The synthetic action passed to entry callbacks of the initial state,
    /// where no triggering action exists.
    pub(crate) fn empty() -> Self {
        Self {
            id: String::new(),
            payload: None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Action({})", self.id)
    }
}

impl From<&str> for Action {
    fn from(s: &str) -> Self {
        Action::new(s)
    }
}

/// How an entry callback is executed during a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DispatchMode {
    /// Run inline on the transitioning thread, while the transition lock is
    /// held. Further transitions are blocked until the callback returns.
    Sync,
    /// Dispatched to its own thread; the transition completes without
    /// waiting for it. Use for long-running work.
    Async,
}

/// Whether the machine has been started.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunState {
    Stopped,
    Running,
}

/// Whether a transition is currently in flight.
///
/// `Busy` means a thread holds the transition lock (running the transition
/// algorithm or a synchronous callback). Asynchronous callbacks executing in
/// the background do not count as busy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityState {
    Idle,
    Busy,
}

/// Composite machine status, readable from any thread.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineStatus {
    pub run_state: RunState,
    pub activity: ActivityState,
}

/// Result of a successfully executed transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionOutcome {
    /// State that was active before the transition
    pub from: StateId,
    /// State that is active after the transition (the deepest entered state
    /// when the target has nested children)
    pub to: StateId,
    /// Id of the action that fired the transition
    pub action: String,
}

/// Report of the actions reachable from the current state.
///
/// This is the introspection surface intended for external transports that
/// want to publish "what can happen next".
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionReport {
    /// The machine has not been started
    NotRunning,
    /// The current state has no outgoing transitions
    NoneAvailable,
    /// Action ids in declaration order
    Available(Vec<String>),
}

/// Type alias for entry callbacks.
///
/// Entry callbacks receive the triggering action and report success or
/// failure. A failure from a synchronous callback is folded into the result
/// of [`execute`](crate::StateMachine::execute); a failure from an
/// asynchronous callback is logged and surfaced through the notifier.
pub type EntryCallbackFn = Arc<dyn Fn(&Action) -> Result<(), String> + Send + Sync>;

/// Type alias for exit callbacks.
///
/// Exit callbacks perform best-effort teardown. They take no arguments,
/// return nothing, and always run synchronously before the state is left.
pub type ExitCallbackFn = Arc<dyn Fn() + Send + Sync>;

/// Type alias for transition guards.
///
/// Guards are predicates over the triggering action; a transition only fires
/// if its guard (when present) returns true.
pub type GuardFn = Arc<dyn Fn(&Action) -> bool + Send + Sync>;

/// Error type for engine operations.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("state machine has not been loaded")]
    NotLoaded,

    #[error("state machine is already loaded")]
    AlreadyLoaded,

    #[error("state machine is not running")]
    NotRunning,

    #[error("state machine is already running")]
    AlreadyRunning,

    #[error("a transition is already in flight")]
    Busy,

    #[error("no transition for action '{action}' from state '{state}'")]
    NoMatchingTransition { state: StateId, action: String },

    #[error("unknown state: {0}")]
    UnknownState(StateId),

    #[error("callback for state '{state}' failed: {detail}")]
    CallbackFailure { state: StateId, detail: String },

    #[error("no initial state declared")]
    NoInitialState,

    #[error("duplicate state id: {0}")]
    DuplicateState(StateId),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("invalid state hierarchy: {0}")]
    InvalidHierarchy(String),
}
