//! Hierarchical state machine execution engine.
//!
//! This crate runs a state chart: it holds the currently active state,
//! processes named actions that may fire transitions, and invokes
//! user-registered entry/exit callbacks as states become active or inactive.
//! Entry callbacks can run inline (blocking the transition) or on their own
//! thread (for long-running work); callbacks can post follow-up actions
//! without deadlocking, and observers are notified on every state change.
//!
//! # Key Concepts
//!
//! ## Graph, registry, machine
//!
//! A chart is built once with [`GraphBuilder`], callbacks are attached
//! through a [`CallbackRegistry`] validated against that graph, and both are
//! handed to a [`StateMachine`] with [`load`](StateMachine::load).
//!
//! ```rust
//! use statechart::prelude::*;
//!
//! let graph = GraphBuilder::new("demo")
//!     .state("idle").initial().done()
//!     .state("working").done()
//!     .transition("idle", "working").on_action("go").done()
//!     .build()?;
//!
//! let mut registry = CallbackRegistry::new(&graph);
//! registry.add_entry_callback("working", DispatchMode::Sync, |action| {
//!     println!("entered working via {action}");
//!     Ok(())
//! })?;
//!
//! let machine = StateMachine::new();
//! machine.load(graph, registry)?;
//! machine.start()?;
//! machine.execute(Action::new("go"))?;
//! assert_eq!(machine.current_state(), Some(StateId::from("working")));
//! machine.stop();
//! # Ok::<(), statechart::EngineError>(())
//! ```
//!
//! ## Executing vs. posting
//!
//! [`execute`](StateMachine::execute) runs the transition on the calling
//! thread and fails fast with [`EngineError::Busy`] when another transition
//! is in flight. [`post`](StateMachine::post) enqueues the action for the
//! internal consumer thread instead; it never blocks and never re-enters
//! the transition lock, which is how a callback schedules a follow-up
//! transition from inside the lock it currently holds.
//!
//! ## Synchronous and asynchronous entry callbacks
//!
//! Entry callbacks registered with [`DispatchMode::Sync`] run inline under
//! the transition lock and their failure is reported to the caller. Those
//! registered with [`DispatchMode::Async`] run on their own thread; the
//! engine never waits for them. The documented halt pattern for a
//! long-running asynchronous callback is a shared flag cleared by the same
//! state's exit callback:
//!
//! ```rust,ignore
//! registry.add_entry_callback("executing", DispatchMode::Async, move |_| {
//!     while keep_going.load(Ordering::Acquire) {
//!         do_one_unit_of_work();
//!     }
//!     Ok(())
//! })?;
//! registry.add_exit_callback("executing", move || {
//!     keep_going_handle.store(false, Ordering::Release);
//! })?;
//! ```
//!
//! ## Hierarchy
//!
//! States may nest. A transition declared on a parent is reachable from any
//! descendant, and entering a compound state descends into its designated
//! initial child. Exit callbacks run inside-out, entry callbacks outside-in.
//!
//! ## Observation
//!
//! [`subscribe`](StateMachine::subscribe) registers an observer invoked with
//! each [`MachineEvent`] on the transitioning thread. Observers must be fast
//! and non-blocking; enqueue-only is the intended pattern.

pub mod builder;
pub mod graph;
pub mod machine;
pub mod notifier;
pub mod queue;
pub mod registry;
pub mod types;

pub use builder::{GraphBuilder, StateBuilder, TransitionBuilder};
pub use graph::{State, StateGraph, Transition};
pub use machine::StateMachine;
pub use notifier::{MachineEvent, Notifier, ObserverFn};
pub use queue::ActionQueue;
pub use registry::{CallbackRegistry, EntryCallback};
pub use types::{
    Action, ActionReport, ActivityState, DispatchMode, EngineError, EntryCallbackFn,
    ExitCallbackFn, GuardFn, MachineStatus, RunState, StateId, TransitionOutcome,
};

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use statechart::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Action, ActionReport, ActivityState, CallbackRegistry, DispatchMode, EngineError,
        GraphBuilder, MachineEvent, MachineStatus, RunState, StateId, StateMachine,
        TransitionOutcome,
    };
}
