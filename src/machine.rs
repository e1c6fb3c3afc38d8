//! The transition engine.
//!
//! [`StateMachine`] owns the current-state pointer, the single-flight
//! transition lock, and the transition algorithm. Actions reach it two ways:
//!
//! - [`execute`](StateMachine::execute) runs the transition on the calling
//!   thread, failing fast with [`EngineError::Busy`] when another transition
//!   is in flight.
//! - [`post`](StateMachine::post) enqueues the action for the internal
//!   queue-consumer thread, which acquires the lock blockingly. Posting
//!   never re-enters the lock, so callbacks may post follow-up actions from
//!   inside a transition without deadlocking.
//!
//! At most one transition is in flight system-wide at any instant.
//! Synchronous entry callbacks and all exit callbacks run under the lock;
//! asynchronous entry callbacks are dispatched to their own thread and the
//! engine never waits for them.

use crate::graph::StateGraph;
use crate::notifier::{MachineEvent, Notifier};
use crate::queue::ActionQueue;
use crate::registry::CallbackRegistry;
use crate::types::{
    Action, ActionReport, ActivityState, DispatchMode, EngineError, MachineStatus, RunState,
    StateId, TransitionOutcome,
};
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

struct MachineParts {
    graph: StateGraph,
    registry: CallbackRegistry,
}

struct Shared {
    parts: RwLock<Option<Arc<MachineParts>>>,
    queue: ActionQueue,
    notifier: Notifier,
    /// Single-flight, non-reentrant transition lock
    transition: Mutex<()>,
    current: RwLock<Option<StateId>>,
    running: AtomicBool,
    busy: AtomicBool,
}

/// Clears the busy flag on every exit path out of the locked section.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn set(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::Release);
        BusyGuard(flag)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Hierarchical state machine execution engine.
///
/// Built once via [`load`](StateMachine::load), driven by
/// [`start`](StateMachine::start)/[`stop`](StateMachine::stop)/
/// [`execute`](StateMachine::execute)/[`post`](StateMachine::post).
///
/// `stop()` must not be called from inside a callback or observer; it waits
/// for the in-flight transition to finish.
pub struct StateMachine {
    shared: Arc<Shared>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl StateMachine {
    /// Create an unloaded machine.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                parts: RwLock::new(None),
                queue: ActionQueue::new(),
                notifier: Notifier::new(),
                transition: Mutex::new(()),
                current: RwLock::new(None),
                running: AtomicBool::new(false),
                busy: AtomicBool::new(false),
            }),
            consumer: Mutex::new(None),
        }
    }

    /// One-time initialization with a built graph and its callback registry.
    pub fn load(&self, graph: StateGraph, registry: CallbackRegistry) -> Result<(), EngineError> {
        let mut parts = self.shared.parts.write();
        if parts.is_some() {
            return Err(EngineError::AlreadyLoaded);
        }
        *parts = Some(Arc::new(MachineParts { graph, registry }));
        Ok(())
    }

    /// Start the machine: enter the initial state, run its entry callbacks,
    /// and spawn the queue-consumer thread.
    ///
    /// A failing synchronous entry callback aborts the start and leaves the
    /// machine stopped with no current state.
    pub fn start(&self) -> Result<(), EngineError> {
        let parts = self.shared.parts.read().clone().ok_or(EngineError::NotLoaded)?;
        let _lock = self.shared.transition.lock();
        let _busy = BusyGuard::set(&self.shared.busy);
        if self.shared.running.load(Ordering::Acquire) {
            return Err(EngineError::AlreadyRunning);
        }

        let entry_path = parts.graph.initial_entry_path();
        let deepest = entry_path
            .last()
            .cloned()
            .ok_or(EngineError::NoInitialState)?;
        *self.shared.current.write() = Some(deepest.clone());

        // The queue must accept posts before any entry callback runs, so
        // actions posted during initial entry survive until the consumer
        // spawns.
        self.shared.queue.clear();
        self.shared.queue.reopen();

        // There is no triggering action yet; entry callbacks of the initial
        // state receive an empty one.
        let action = Action::empty();
        for state in &entry_path {
            if let Err(err) = dispatch_entry_callbacks(&self.shared, &parts, state, &action) {
                *self.shared.current.write() = None;
                return Err(err);
            }
        }

        self.shared.running.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        *self.consumer.lock() = Some(thread::spawn(move || consumer_loop(shared)));

        self.shared
            .notifier
            .notify(&MachineEvent::StateEntered(deepest.clone()));
        info!(
            "state machine '{}' started in state '{}'",
            parts.graph.name(),
            deepest
        );
        Ok(())
    }

    /// Stop the machine. Idempotent.
    ///
    /// Signals the queue consumer to exit after its current pop and waits
    /// for it. In-flight asynchronous callbacks are not cancelled; they must
    /// reach a natural stopping point themselves.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.queue.close();

        // Wait out any in-flight transition before clearing the current
        // state; no state is current while stopped.
        {
            let _lock = self.shared.transition.lock();
            *self.shared.current.write() = None;
        }

        if let Some(handle) = self.consumer.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }

        if let Some(parts) = self.shared.parts.read().as_ref() {
            info!("state machine '{}' stopped", parts.graph.name());
        }
    }

    /// Execute an action on the calling thread.
    ///
    /// Fails fast with [`EngineError::Busy`] when another transition is in
    /// flight. Returns once all synchronous callbacks have run; does not
    /// wait for asynchronous entry callbacks. A synchronous entry-callback
    /// failure is reported as [`EngineError::CallbackFailure`] but does not
    /// revert the state change already applied.
    pub fn execute(&self, action: Action) -> Result<TransitionOutcome, EngineError> {
        if !self.is_running() {
            return Err(EngineError::NotRunning);
        }
        let parts = self.shared.parts.read().clone().ok_or(EngineError::NotLoaded)?;
        let Some(_lock) = self.shared.transition.try_lock() else {
            return Err(EngineError::Busy);
        };
        let _busy = BusyGuard::set(&self.shared.busy);
        if !self.shared.running.load(Ordering::Acquire) {
            return Err(EngineError::NotRunning);
        }
        run_transition(&self.shared, &parts, &action)
    }

    /// Enqueue an action for the queue consumer. Always succeeds and never
    /// blocks; safe to call from inside a callback running under the
    /// transition lock.
    pub fn post(&self, action: Action) {
        self.shared.queue.post(action);
    }

    /// Whether a transition is currently in flight.
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    /// Whether the machine has been started and not yet stopped.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Composite status snapshot.
    pub fn status(&self) -> MachineStatus {
        MachineStatus {
            run_state: if self.is_running() {
                RunState::Running
            } else {
                RunState::Stopped
            },
            activity: if self.is_busy() {
                ActivityState::Busy
            } else {
                ActivityState::Idle
            },
        }
    }

    /// The currently active (deepest) state, or `None` while stopped.
    pub fn current_state(&self) -> Option<StateId> {
        self.shared.current.read().clone()
    }

    /// Action ids reachable from the current state and its ancestors, in
    /// declaration order. Empty while stopped.
    pub fn available_actions(&self) -> Vec<String> {
        if !self.is_running() {
            return Vec::new();
        }
        let Some(parts) = self.shared.parts.read().clone() else {
            return Vec::new();
        };
        let Some(current) = self.shared.current.read().clone() else {
            return Vec::new();
        };

        let mut actions = Vec::new();
        let mut chain = vec![current.clone()];
        chain.extend(parts.graph.ancestors(&current));
        for state in &chain {
            for transition in parts.graph.outgoing_transitions(state) {
                if !actions.contains(&transition.action_id) {
                    actions.push(transition.action_id.clone());
                }
            }
        }
        actions
    }

    /// Introspection surface for external transports.
    pub fn action_report(&self) -> ActionReport {
        if !self.is_running() {
            return ActionReport::NotRunning;
        }
        let actions = self.available_actions();
        if actions.is_empty() {
            ActionReport::NoneAvailable
        } else {
            ActionReport::Available(actions)
        }
    }

    /// Register an observer invoked with every [`MachineEvent`].
    ///
    /// Observers run synchronously on the transitioning thread, inside the
    /// locked section for `StateEntered`; they must be fast and must not
    /// call back into the engine's locking operations.
    pub fn subscribe<F>(&self, observer: F)
    where
        F: Fn(&MachineEvent) + Send + Sync + 'static,
    {
        self.shared.notifier.subscribe(observer);
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StateMachine {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMachine")
            .field("loaded", &self.shared.parts.read().is_some())
            .field("running", &self.is_running())
            .field("busy", &self.is_busy())
            .field("current", &*self.shared.current.read())
            .field("queued", &self.shared.queue.len())
            .finish()
    }
}

/// The transition algorithm. Caller must hold the transition lock.
fn run_transition(
    shared: &Arc<Shared>,
    parts: &MachineParts,
    action: &Action,
) -> Result<TransitionOutcome, EngineError> {
    let current = shared
        .current
        .read()
        .clone()
        .ok_or(EngineError::NotRunning)?;

    // Resolve against the current state first, then each ancestor. The
    // first declared match wins, including when the definition carries
    // duplicate action ids.
    let mut chain = vec![current.clone()];
    chain.extend(parts.graph.ancestors(&current));
    let transition = chain
        .iter()
        .flat_map(|state| parts.graph.outgoing_transitions(state))
        .find(|t| t.matches(action))
        .cloned();

    let Some(transition) = transition else {
        return Err(EngineError::NoMatchingTransition {
            state: current,
            action: action.id.clone(),
        });
    };

    let (exit_path, entry_path) =
        parts
            .graph
            .transition_paths(&current, &transition.source, &transition.target);

    // Exit callbacks run inside-out and must complete before the state
    // changes; they halt whatever the exited states started.
    for state in &exit_path {
        for callback in parts.registry.exit_callbacks(state) {
            callback();
        }
    }

    let entered = entry_path
        .last()
        .cloned()
        .unwrap_or_else(|| transition.target.clone());
    *shared.current.write() = Some(entered.clone());

    shared
        .notifier
        .notify(&MachineEvent::StateEntered(entered.clone()));

    // The state change is not reverted on entry failure; the first failure
    // is reported after all entered states had their callbacks dispatched.
    let mut failure = None;
    for state in &entry_path {
        if let Err(err) = dispatch_entry_callbacks(shared, parts, state, action) {
            failure.get_or_insert(err);
        }
    }

    debug!(
        "transition {} -> {} via '{}'",
        current, entered, action.id
    );

    match failure {
        Some(err) => Err(err),
        None => Ok(TransitionOutcome {
            from: current,
            to: entered,
            action: action.id.clone(),
        }),
    }
}

/// Invoke every entry callback of `state` in registration order.
///
/// Synchronous callbacks run inline; the first failure is returned after the
/// whole list has been invoked. Asynchronous callbacks are dispatched to a
/// fresh thread; their failures are logged and surfaced via the notifier.
fn dispatch_entry_callbacks(
    shared: &Arc<Shared>,
    parts: &MachineParts,
    state: &StateId,
    action: &Action,
) -> Result<(), EngineError> {
    let mut failure = None;
    for callback in parts.registry.entry_callbacks(state) {
        match callback.mode {
            DispatchMode::Sync => {
                if let Err(detail) = (callback.func)(action) {
                    error!("entry callback for state '{state}' failed: {detail}");
                    failure.get_or_insert(EngineError::CallbackFailure {
                        state: state.clone(),
                        detail,
                    });
                }
            }
            DispatchMode::Async => {
                let func = Arc::clone(&callback.func);
                let action = action.clone();
                let state = state.clone();
                let shared = Arc::clone(shared);
                thread::spawn(move || {
                    if let Err(detail) = func(&action) {
                        error!("async entry callback for state '{state}' failed: {detail}");
                        shared
                            .notifier
                            .notify(&MachineEvent::CallbackFailed { state, detail });
                    }
                });
            }
        }
    }
    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Drains the action queue until the machine stops.
fn consumer_loop(shared: Arc<Shared>) {
    debug!("queue consumer started");
    while let Some(action) = shared.queue.pop_blocking() {
        let Some(parts) = shared.parts.read().clone() else {
            break;
        };
        // Unlike execute(), the consumer has no caller to report Busy to;
        // it waits its turn.
        let _lock = shared.transition.lock();
        let _busy = BusyGuard::set(&shared.busy);
        if !shared.running.load(Ordering::Acquire) {
            break;
        }
        match run_transition(&shared, &parts, &action) {
            Ok(outcome) => debug!(
                "queued action '{}' moved {} -> {}",
                outcome.action, outcome.from, outcome.to
            ),
            Err(EngineError::NoMatchingTransition { state, action }) => warn!(
                "discarding queued action '{action}': no transition from state '{state}'"
            ),
            Err(err) => error!("queued action '{}' failed: {err}", action.id),
        }
    }
    debug!("queue consumer exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    fn workflow_graph() -> StateGraph {
        GraphBuilder::new("workflow")
            .state("idle")
            .initial()
            .done()
            .state("working")
            .done()
            .state("done")
            .done()
            .transition("idle", "working")
            .on_action("go")
            .done()
            .transition("working", "done")
            .on_action("finish")
            .done()
            .build()
            .unwrap()
    }

    fn loaded_machine(graph: StateGraph, registry: CallbackRegistry) -> StateMachine {
        let machine = StateMachine::new();
        machine.load(graph, registry).unwrap();
        machine
    }

    #[test]
    fn test_start_requires_load() {
        let machine = StateMachine::new();
        assert_eq!(machine.start().err(), Some(EngineError::NotLoaded));
    }

    #[test]
    fn test_load_twice_fails() {
        let graph = workflow_graph();
        let registry = CallbackRegistry::new(&graph);
        let machine = loaded_machine(graph, registry);

        let graph2 = workflow_graph();
        let registry2 = CallbackRegistry::new(&graph2);
        assert_eq!(
            machine.load(graph2, registry2).err(),
            Some(EngineError::AlreadyLoaded)
        );
    }

    #[test]
    fn test_start_enters_initial_state() {
        let graph = workflow_graph();
        let registry = CallbackRegistry::new(&graph);
        let machine = loaded_machine(graph, registry);

        machine.start().unwrap();
        assert!(machine.is_running());
        assert_eq!(machine.current_state(), Some("idle".into()));
        assert_eq!(machine.start().err(), Some(EngineError::AlreadyRunning));
        machine.stop();
    }

    #[test]
    fn test_scenario_idle_working_done() {
        let graph = workflow_graph();
        let registry = CallbackRegistry::new(&graph);
        let machine = loaded_machine(graph, registry);
        machine.start().unwrap();

        let outcome = machine.execute(Action::new("go")).unwrap();
        assert_eq!(outcome.from, "idle".into());
        assert_eq!(outcome.to, "working".into());
        assert_eq!(machine.current_state(), Some("working".into()));

        let err = machine.execute(Action::new("bogus")).unwrap_err();
        assert_eq!(
            err,
            EngineError::NoMatchingTransition {
                state: "working".into(),
                action: "bogus".to_string(),
            }
        );
        assert_eq!(machine.current_state(), Some("working".into()));

        machine.execute(Action::new("finish")).unwrap();
        assert_eq!(machine.current_state(), Some("done".into()));
        machine.stop();
    }

    #[test]
    fn test_execute_while_stopped() {
        let graph = workflow_graph();
        let registry = CallbackRegistry::new(&graph);
        let machine = loaded_machine(graph, registry);
        assert_eq!(
            machine.execute(Action::new("go")).err(),
            Some(EngineError::NotRunning)
        );
    }

    #[test]
    fn test_stop_is_idempotent() {
        let graph = workflow_graph();
        let registry = CallbackRegistry::new(&graph);
        let machine = loaded_machine(graph, registry);
        machine.start().unwrap();

        machine.stop();
        assert!(!machine.is_running());
        assert_eq!(machine.current_state(), None);
        machine.stop();
        assert!(!machine.is_running());
        assert_eq!(machine.current_state(), None);
    }

    #[test]
    fn test_entry_and_exit_callback_order() {
        let graph = workflow_graph();
        let mut registry = CallbackRegistry::new(&graph);
        let trace: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        {
            let trace = Arc::clone(&trace);
            registry
                .add_exit_callback("idle", move || trace.lock().push("exit-idle"))
                .unwrap();
        }
        for tag in ["enter-working-1", "enter-working-2"] {
            let trace = Arc::clone(&trace);
            registry
                .add_entry_callback("working", DispatchMode::Sync, move |_| {
                    trace.lock().push(tag);
                    Ok(())
                })
                .unwrap();
        }

        let machine = loaded_machine(graph, registry);
        machine.start().unwrap();
        machine.execute(Action::new("go")).unwrap();

        assert_eq!(
            *trace.lock(),
            vec!["exit-idle", "enter-working-1", "enter-working-2"]
        );
        machine.stop();
    }

    #[test]
    fn test_entry_callback_receives_triggering_action() {
        let graph = workflow_graph();
        let mut registry = CallbackRegistry::new(&graph);
        let seen: Arc<Mutex<Option<Action>>> = Arc::new(Mutex::new(None));
        {
            let seen = Arc::clone(&seen);
            registry
                .add_entry_callback("working", DispatchMode::Sync, move |action| {
                    *seen.lock() = Some(action.clone());
                    Ok(())
                })
                .unwrap();
        }

        let machine = loaded_machine(graph, registry);
        machine.start().unwrap();
        machine
            .execute(Action::with_payload("go", serde_json::json!({"job": 7})))
            .unwrap();

        let action = seen.lock().clone().unwrap();
        assert_eq!(action.id, "go");
        assert_eq!(action.payload.unwrap()["job"], 7);
        machine.stop();
    }

    #[test]
    fn test_sync_entry_failure_reported_but_state_kept() {
        let graph = workflow_graph();
        let mut registry = CallbackRegistry::new(&graph);
        registry
            .add_entry_callback("working", DispatchMode::Sync, |_| {
                Err("device offline".to_string())
            })
            .unwrap();

        let machine = loaded_machine(graph, registry);
        machine.start().unwrap();

        let err = machine.execute(Action::new("go")).unwrap_err();
        assert_eq!(
            err,
            EngineError::CallbackFailure {
                state: "working".into(),
                detail: "device offline".to_string(),
            }
        );
        // The state change is not rolled back.
        assert_eq!(machine.current_state(), Some("working".into()));
        machine.stop();
    }

    #[test]
    fn test_initial_entry_failure_aborts_start() {
        let graph = workflow_graph();
        let mut registry = CallbackRegistry::new(&graph);
        registry
            .add_entry_callback("idle", DispatchMode::Sync, |_| {
                Err("init failed".to_string())
            })
            .unwrap();

        let machine = loaded_machine(graph, registry);
        let err = machine.start().unwrap_err();
        assert!(matches!(err, EngineError::CallbackFailure { .. }));
        assert!(!machine.is_running());
        assert_eq!(machine.current_state(), None);
    }

    #[test]
    fn test_guard_rejection_is_no_matching_transition() {
        let graph = GraphBuilder::new("guarded")
            .state("a")
            .initial()
            .done()
            .state("b")
            .done()
            .transition("a", "b")
            .on_action("go")
            .with_guard(|action| action.payload.is_some())
            .done()
            .build()
            .unwrap();
        let registry = CallbackRegistry::new(&graph);
        let machine = loaded_machine(graph, registry);
        machine.start().unwrap();

        assert!(matches!(
            machine.execute(Action::new("go")),
            Err(EngineError::NoMatchingTransition { .. })
        ));
        assert_eq!(machine.current_state(), Some("a".into()));

        machine
            .execute(Action::with_payload("go", serde_json::json!(1)))
            .unwrap();
        assert_eq!(machine.current_state(), Some("b".into()));
        machine.stop();
    }

    #[test]
    fn test_duplicate_action_ids_first_declared_wins() {
        let graph = GraphBuilder::new("dupes")
            .state("a")
            .initial()
            .done()
            .state("b")
            .done()
            .state("c")
            .done()
            .transition("a", "b")
            .on_action("go")
            .done()
            .transition("a", "c")
            .on_action("go")
            .done()
            .build()
            .unwrap();
        let registry = CallbackRegistry::new(&graph);
        let machine = loaded_machine(graph, registry);
        machine.start().unwrap();

        machine.execute(Action::new("go")).unwrap();
        assert_eq!(machine.current_state(), Some("b".into()));
        machine.stop();
    }

    #[test]
    fn test_available_actions_and_report() {
        let graph = workflow_graph();
        let registry = CallbackRegistry::new(&graph);
        let machine = loaded_machine(graph, registry);

        assert!(machine.available_actions().is_empty());
        assert_eq!(machine.action_report(), ActionReport::NotRunning);

        machine.start().unwrap();
        assert_eq!(machine.available_actions(), vec!["go".to_string()]);
        assert_eq!(
            machine.action_report(),
            ActionReport::Available(vec!["go".to_string()])
        );

        machine.execute(Action::new("go")).unwrap();
        machine.execute(Action::new("finish")).unwrap();
        // "done" has no outgoing transitions.
        assert_eq!(machine.action_report(), ActionReport::NoneAvailable);
        machine.stop();
    }

    #[test]
    fn test_observer_sees_transitions_in_order() {
        let graph = workflow_graph();
        let registry = CallbackRegistry::new(&graph);
        let machine = loaded_machine(graph, registry);

        let entered: Arc<Mutex<Vec<StateId>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let entered = Arc::clone(&entered);
            machine.subscribe(move |event| {
                if let MachineEvent::StateEntered(state) = event {
                    entered.lock().push(state.clone());
                }
            });
        }

        machine.start().unwrap();
        machine.execute(Action::new("go")).unwrap();
        machine.execute(Action::new("finish")).unwrap();

        assert_eq!(
            *entered.lock(),
            vec!["idle".into(), "working".into(), "done".into()]
        );
        machine.stop();
    }

    #[test]
    fn test_posted_action_from_sync_callback_is_processed() {
        // A synchronous entry callback posts the follow-up action while the
        // transition lock is held; the queue consumer picks it up after the
        // lock is released. The engine must stay responsive throughout.
        let graph = workflow_graph();
        let mut registry = CallbackRegistry::new(&graph);
        let machine = Arc::new(StateMachine::new());
        {
            let machine = Arc::clone(&machine);
            registry
                .add_entry_callback("working", DispatchMode::Sync, move |_| {
                    machine.post(Action::new("finish"));
                    Ok(())
                })
                .unwrap();
        }
        machine.load(graph, registry).unwrap();
        machine.start().unwrap();

        machine.execute(Action::new("go")).unwrap();
        assert!(wait_until(|| machine.current_state() == Some("done".into())));
        machine.stop();
    }

    #[test]
    fn test_unmatched_queued_actions_drain_without_corruption() {
        let graph = workflow_graph();
        let registry = CallbackRegistry::new(&graph);
        let machine = loaded_machine(graph, registry);
        machine.start().unwrap();

        // None of these match from idle; they are logged and discarded.
        for _ in 0..5 {
            machine.post(Action::new("finish"));
        }
        machine.post(Action::new("go"));
        assert!(wait_until(|| machine.current_state() == Some("working".into())));
        machine.stop();
    }

    #[test]
    fn test_ancestor_transition_fires_from_descendant() {
        let graph = GraphBuilder::new("nested")
            .state("root")
            .initial()
            .initial_child("working")
            .done()
            .state("working")
            .parent("root")
            .done()
            .state("aborted")
            .done()
            .transition("root", "aborted")
            .on_action("abort")
            .done()
            .build()
            .unwrap();
        let mut registry = CallbackRegistry::new(&graph);
        let trace: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        for (state, tag) in [("working", "exit-working"), ("root", "exit-root")] {
            let trace = Arc::clone(&trace);
            registry
                .add_exit_callback(state, move || trace.lock().push(tag))
                .unwrap();
        }

        let machine = loaded_machine(graph, registry);
        machine.start().unwrap();
        // start descends into the initial child.
        assert_eq!(machine.current_state(), Some("working".into()));

        machine.execute(Action::new("abort")).unwrap();
        assert_eq!(machine.current_state(), Some("aborted".into()));
        // Exit callbacks ran inside-out.
        assert_eq!(*trace.lock(), vec!["exit-working", "exit-root"]);
        machine.stop();
    }

    #[test]
    fn test_action_posted_from_initial_entry_callback_survives_start() {
        // An initial-state entry callback posts before the consumer thread
        // exists; the action must stay queued and be consumed once the
        // consumer spawns.
        let graph = workflow_graph();
        let mut registry = CallbackRegistry::new(&graph);
        let machine = Arc::new(StateMachine::new());
        {
            let machine = Arc::clone(&machine);
            registry
                .add_entry_callback("idle", DispatchMode::Sync, move |_| {
                    machine.post(Action::new("go"));
                    Ok(())
                })
                .unwrap();
        }
        machine.load(graph, registry).unwrap();
        machine.start().unwrap();

        assert!(wait_until(|| machine.current_state() == Some("working".into())));
        machine.stop();
    }

    #[test]
    fn test_ancestor_transition_reenters_intermediate_state() {
        // "jump" is declared on root and targets y inside sub, so the
        // transition's domain is root: sub exits and re-enters even though
        // the active state x and the target y share sub as an ancestor.
        let graph = GraphBuilder::new("layered")
            .state("root")
            .initial()
            .initial_child("sub")
            .done()
            .state("sub")
            .parent("root")
            .initial_child("x")
            .done()
            .state("x")
            .parent("sub")
            .done()
            .state("y")
            .parent("sub")
            .done()
            .transition("root", "y")
            .on_action("jump")
            .done()
            .build()
            .unwrap();
        let mut registry = CallbackRegistry::new(&graph);
        let trace: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        for (state, tag) in [("x", "exit-x"), ("sub", "exit-sub")] {
            let trace = Arc::clone(&trace);
            registry
                .add_exit_callback(state, move || trace.lock().push(tag))
                .unwrap();
        }
        for (state, tag) in [("sub", "enter-sub"), ("y", "enter-y")] {
            let trace = Arc::clone(&trace);
            registry
                .add_entry_callback(state, DispatchMode::Sync, move |_| {
                    trace.lock().push(tag);
                    Ok(())
                })
                .unwrap();
        }

        let machine = loaded_machine(graph, registry);
        machine.start().unwrap();
        trace.lock().clear();
        assert_eq!(machine.current_state(), Some("x".into()));

        machine.execute(Action::new("jump")).unwrap();
        assert_eq!(machine.current_state(), Some("y".into()));
        assert_eq!(
            *trace.lock(),
            vec!["exit-x", "exit-sub", "enter-sub", "enter-y"]
        );
        machine.stop();
    }

    #[test]
    fn test_restart_after_stop() {
        let graph = workflow_graph();
        let registry = CallbackRegistry::new(&graph);
        let machine = loaded_machine(graph, registry);

        machine.start().unwrap();
        machine.execute(Action::new("go")).unwrap();
        machine.stop();

        machine.start().unwrap();
        assert_eq!(machine.current_state(), Some("idle".into()));
        machine.stop();
    }

    #[test]
    fn test_status_snapshot() {
        let graph = workflow_graph();
        let registry = CallbackRegistry::new(&graph);
        let machine = loaded_machine(graph, registry);

        assert_eq!(
            machine.status(),
            MachineStatus {
                run_state: RunState::Stopped,
                activity: ActivityState::Idle,
            }
        );
        machine.start().unwrap();
        assert_eq!(machine.status().run_state, RunState::Running);
        assert_eq!(machine.status().activity, ActivityState::Idle);
        machine.stop();
    }
}
