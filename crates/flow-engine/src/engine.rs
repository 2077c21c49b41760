//! Reactive execution engine
//!
//! This module runs a node definition as a reactive process. Values pushed
//! into the top-level input streams are threaded through a synchronous,
//! depth-first cascade:
//!
//! ```text
//! arrival -> pin store -> readiness -> firing -> emission -> arrival ...
//! ```
//!
//! # Key Concepts
//!
//! - **Arena**: every instance lives in a map keyed by its [`InstancePath`];
//!   routes name their targets by path, so there are no back-references
//! - **Re-entrancy**: no `RefCell` borrow is held while user code runs, so a
//!   computation (or one of its callbacks) may push values that re-trigger
//!   the same instance before the outer cascade unwinds
//! - **Absorbing termination**: a completed, failed, or torn-down instance
//!   never fires or emits again
//! - **Weak handles**: sinks and contexts kept by callbacks reference the
//!   run weakly; after the run ends their emissions are discarded

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::completion::{CompletionPolicy, CompletionTracker};
use crate::config::EngineConfig;
use crate::context::{CleanupFn, ExecutionContext, FiringState, NodeInputs, NodeOutputs, StateStore};
use crate::error::{EngineError, NodeError, Result};
use crate::events::{HistoryPage, TraceEventKind, TraceSink, Tracer};
use crate::pins::PinStore;
use crate::readiness;
use crate::registry::NodeRegistry;
use crate::side_channel::SideChannelRegistry;
use crate::stream::{PinStream, SubscriptionId};
use crate::types::{
    InstancePath, NodeDefinition, NodeExecutor, PinConfig, PinId, PinType, ERROR_PIN,
};

/// Lifecycle state of one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Waiting for gating pins
    Pending,
    /// About to fire
    Fireable,
    /// Inside at least one call of its computation
    Running,
    /// Finished through its completion outputs
    Completed,
    /// Terminated by an uncaught error
    Failed,
    /// Terminated by teardown of the run or an enclosing composite
    TornDown,
}

impl Lifecycle {
    /// Terminal states are absorbing
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TornDown)
    }
}

/// Outcome of a run, as seen by the caller
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RunStatus {
    Running,
    /// The root instance completed
    Completed,
    /// An error reached the root uncaught
    Failed(NodeError),
    /// The caller tore the run down
    TornDown,
}

/// Where an emitted value goes
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Target {
    /// An input pin of an instance
    Input { path: InstancePath, pin: PinId },
    /// An output pin of an enclosing composite
    Output { path: InstancePath, pin: PinId },
    /// A stream supplied by the caller of `execute`
    Boundary(PinId),
}

pub(crate) enum InstanceKind {
    Leaf {
        pins: RefCell<PinStore>,
        /// Input pins with something feeding them
        connected: HashSet<PinId>,
        executor: Rc<dyn NodeExecutor>,
    },
    Composite {
        /// Composite input pin to the child pins it feeds
        input_forwards: HashMap<PinId, Vec<(InstancePath, PinId)>>,
    },
}

/// Runtime state of one instance
pub(crate) struct InstanceRuntime {
    pub(crate) path: Rc<InstancePath>,
    pub(crate) key: String,
    pub(crate) definition: Rc<NodeDefinition>,
    pub(crate) kind: InstanceKind,
    routes: RefCell<HashMap<PinId, Vec<Target>>>,
    state: Cell<Lifecycle>,
    running: Cell<usize>,
    cleanups: RefCell<Vec<CleanupFn>>,
    store: StateStore,
    completion: RefCell<Option<CompletionTracker>>,
    /// Non-reactive values of the active reactive cycle, if one is open
    cycle: RefCell<Option<HashMap<PinId, Value>>>,
}

impl InstanceRuntime {
    pub(crate) fn new(
        path: InstancePath,
        definition: Rc<NodeDefinition>,
        kind: InstanceKind,
    ) -> Rc<Self> {
        let completion = definition
            .completion_outputs
            .as_deref()
            .map(|groups| CompletionTracker::new(CompletionPolicy::parse(groups)));
        Rc::new(Self {
            key: path.to_string(),
            path: Rc::new(path),
            definition,
            kind,
            routes: RefCell::new(HashMap::new()),
            state: Cell::new(Lifecycle::Pending),
            running: Cell::new(0),
            cleanups: RefCell::new(Vec::new()),
            store: StateStore::default(),
            completion: RefCell::new(completion),
            cycle: RefCell::new(None),
        })
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        let state = self.state.get();
        if !state.is_terminal() && self.running.get() > 0 {
            Lifecycle::Running
        } else {
            state
        }
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.state.get().is_terminal()
    }

    fn set_state(&self, state: Lifecycle) {
        if !self.is_terminal() {
            self.state.set(state);
        }
    }

    /// Append a route; routes keep declaration order
    pub(crate) fn add_route(&self, pin: &str, target: Target) {
        self.routes
            .borrow_mut()
            .entry(pin.to_string())
            .or_default()
            .push(target);
    }

    fn targets(&self, pin: &str) -> Vec<Target> {
        self.routes.borrow().get(pin).cloned().unwrap_or_default()
    }

    fn catches_errors(&self) -> bool {
        self.routes
            .borrow()
            .get(ERROR_PIN)
            .is_some_and(|targets| !targets.is_empty())
    }

    /// Whether the first firing opens a long-lived reactive cycle
    fn opens_cycle(&self) -> bool {
        self.definition.completion_outputs.is_some() && !self.definition.reactive_inputs.is_empty()
    }
}

/// Shared state of one run
pub(crate) struct Runtime {
    me: Weak<Runtime>,
    execution_id: Rc<str>,
    pub(crate) config: EngineConfig,
    pub(crate) registry: NodeRegistry,
    tracer: Tracer,
    side_channels: Rc<SideChannelRegistry>,
    boundary_outputs: HashMap<PinId, Rc<dyn PinStream>>,
    instances: RefCell<HashMap<InstancePath, Rc<InstanceRuntime>>>,
    /// Instantiation order, used for teardown
    order: RefCell<Vec<InstancePath>>,
    status: RefCell<RunStatus>,
    depth: Cell<usize>,
    input_subscriptions: RefCell<Vec<(Rc<dyn PinStream>, SubscriptionId)>>,
}

impl Runtime {
    pub(crate) fn new(
        execution_id: String,
        config: EngineConfig,
        registry: NodeRegistry,
        trace_sink: Option<Rc<dyn TraceSink>>,
        side_channels: Rc<SideChannelRegistry>,
        boundary_outputs: HashMap<PinId, Rc<dyn PinStream>>,
    ) -> Rc<Self> {
        Rc::new_cyclic(|me| Self {
            me: me.clone(),
            tracer: Tracer::new(execution_id.clone(), trace_sink, config.history_limit),
            execution_id: Rc::from(execution_id),
            config,
            registry,
            side_channels,
            boundary_outputs,
            instances: RefCell::new(HashMap::new()),
            order: RefCell::new(Vec::new()),
            status: RefCell::new(RunStatus::Running),
            depth: Cell::new(0),
            input_subscriptions: RefCell::new(Vec::new()),
        })
    }

    pub(crate) fn instance(&self, path: &InstancePath) -> Option<Rc<InstanceRuntime>> {
        self.instances.borrow().get(path).cloned()
    }

    pub(crate) fn insert_instance(&self, instance: Rc<InstanceRuntime>) {
        let path = (*instance.path).clone();
        self.instances.borrow_mut().insert(path.clone(), instance);
        self.order.borrow_mut().push(path);
    }

    pub(crate) fn instance_paths(&self) -> Vec<InstancePath> {
        self.order.borrow().clone()
    }

    pub(crate) fn side_channels(&self) -> &Rc<SideChannelRegistry> {
        &self.side_channels
    }

    pub(crate) fn is_running(&self) -> bool {
        matches!(*self.status.borrow(), RunStatus::Running)
    }

    /// Whether the instance at `path` can still fire and emit
    pub(crate) fn is_live(&self, path: &InstancePath) -> bool {
        self.is_running() && self.instance(path).is_some_and(|i| !i.is_terminal())
    }

    /// Route the root's outputs to the caller's sinks
    pub(crate) fn connect_boundary_outputs(&self, root: &InstanceRuntime) {
        let mut pins: Vec<&PinId> = self.boundary_outputs.keys().collect();
        pins.sort();
        for pin in pins {
            root.add_route(pin, Target::Boundary(pin.clone()));
        }
    }

    /// Subscribe the root's input pins to the caller's streams
    pub(crate) fn subscribe_inputs(&self, inputs: HashMap<PinId, Rc<dyn PinStream>>) {
        let root = InstancePath::root();
        let mut subscriptions = Vec::with_capacity(inputs.len());
        for (pin, stream) in inputs {
            let runtime = self.me.clone();
            let path = root.clone();
            let pin_id = pin.clone();
            let id = stream.subscribe(Rc::new(move |value: &Value| {
                if let Some(runtime) = runtime.upgrade() {
                    runtime.deliver(&path, &pin_id, value.clone());
                }
            }));
            subscriptions.push((stream, id));
        }
        self.input_subscriptions.borrow_mut().extend(subscriptions);
    }

    fn unsubscribe_inputs(&self) {
        let subscriptions = std::mem::take(&mut *self.input_subscriptions.borrow_mut());
        for (stream, id) in subscriptions {
            stream.unsubscribe(id);
        }
    }

    /// Fire every source instance that is ready without any input
    pub(crate) fn kick_off(&self) {
        let sources: Vec<Rc<InstanceRuntime>> = self
            .order
            .borrow()
            .iter()
            .filter_map(|path| self.instance(path))
            .filter(|inst| {
                matches!(&inst.kind, InstanceKind::Leaf { connected, .. } if connected.is_empty())
            })
            .collect();
        for inst in sources {
            if !self.is_running() {
                break;
            }
            self.on_arrival(&inst, None);
        }
    }

    /// Deliver a value to an input pin
    pub(crate) fn deliver(&self, path: &InstancePath, pin: &str, value: Value) {
        if !self.is_running() {
            log::debug!("Dropping value for '{}.{}': run has ended", path, pin);
            return;
        }
        let Some(inst) = self.instance(path) else {
            log::warn!("Dropping value for unknown instance '{}'", path);
            return;
        };
        if inst.is_terminal() {
            log::debug!(
                "Dropping value for '{}.{}': instance is {:?}",
                inst.key,
                pin,
                inst.lifecycle()
            );
            return;
        }

        let depth = self.depth.get();
        if depth >= self.config.max_cascade_depth {
            let error = NodeError::new(format!(
                "Cascade depth limit of {} exceeded delivering to '{}'",
                self.config.max_cascade_depth, pin
            ))
            .originating_at(&inst.key);
            log::warn!("{} on '{}'", error, inst.key);
            self.trace_error(&inst, &error);
            self.escalate(&inst, error);
            return;
        }

        self.depth.set(depth + 1);
        self.tracer.emit(
            &inst.path,
            Some((pin, PinType::Input)),
            TraceEventKind::InputReceived {
                value: value.clone(),
            },
        );
        match &inst.kind {
            InstanceKind::Composite { input_forwards } => {
                for (child, child_pin) in input_forwards.get(pin).into_iter().flatten() {
                    self.deliver(child, child_pin, value.clone());
                }
            }
            InstanceKind::Leaf { pins, .. } => {
                let count = {
                    let mut store = pins.borrow_mut();
                    store.push(pin, value).then(|| store.queued_count(pin))
                };
                match count {
                    Some(count) => {
                        self.tracer.emit(
                            &inst.path,
                            Some((pin, PinType::Input)),
                            TraceEventKind::QueueChanged { count },
                        );
                        self.on_arrival(&inst, Some(pin));
                    }
                    None => log::warn!("'{}' has no input pin '{}'", inst.key, pin),
                }
            }
        }
        self.depth.set(depth);
    }

    /// Readiness handling after an arrival (or at kick-off, with no pin)
    fn on_arrival(&self, inst: &Rc<InstanceRuntime>, pin: Option<&str>) {
        let InstanceKind::Leaf {
            pins, connected, ..
        } = &inst.kind
        else {
            return;
        };

        if inst.cycle.borrow().is_some() {
            match pin {
                Some(pin) if inst.definition.is_reactive(pin) => self.fire_reactive(inst, pin),
                // Non-reactive queues are never consumed while the cycle is open
                Some(pin) => {
                    let dropped = pins.borrow_mut().keep_newest(pin);
                    if dropped > 0 {
                        log::debug!(
                            "Dropped {} stale value(s) on '{}.{}' during reactive cycle",
                            dropped,
                            inst.key,
                            pin
                        );
                        self.tracer.emit(
                            &inst.path,
                            Some((pin, PinType::Input)),
                            TraceEventKind::QueueChanged { count: 1 },
                        );
                    }
                }
                None => {}
            }
            return;
        }

        let mut fired = false;
        while !inst.is_terminal() && inst.cycle.borrow().is_none() {
            let ready = readiness::evaluate(&inst.definition, &pins.borrow(), connected);
            if !ready.is_ready() {
                inst.set_state(Lifecycle::Pending);
                break;
            }
            let input_ids = inst.definition.inputs.iter().map(|p| p.id.as_str());
            if fired && !pins.borrow().has_buffered(input_ids) {
                break;
            }
            inst.set_state(Lifecycle::Fireable);
            self.fire(inst);
            fired = true;
        }
    }

    /// A normal firing: consume every pin that has a value
    fn fire(&self, inst: &Rc<InstanceRuntime>) {
        let InstanceKind::Leaf { pins, .. } = &inst.kind else {
            return;
        };
        let (values, counts) = {
            let mut store = pins.borrow_mut();
            let names = readiness::firing_pins(&inst.definition, &store);
            let values = store.consume(names.iter().copied());
            let counts: Vec<(&str, usize)> = names
                .iter()
                .filter(|pin| store.config(pin) == Some(PinConfig::Queue))
                .map(|pin| (*pin, store.queued_count(pin)))
                .collect();
            (values, counts)
        };
        for (pin, count) in counts {
            self.tracer.emit(
                &inst.path,
                Some((pin, PinType::Input)),
                TraceEventKind::QueueChanged { count },
            );
        }

        if inst.opens_cycle() {
            let cached = values
                .iter()
                .filter(|(pin, _)| !inst.definition.is_reactive(pin))
                .map(|(pin, value)| (pin.clone(), value.clone()))
                .collect();
            *inst.cycle.borrow_mut() = Some(cached);
        }
        self.run_leaf(inst, values);
    }

    /// A firing inside an active reactive cycle, triggered by `pin`
    fn fire_reactive(&self, inst: &Rc<InstanceRuntime>, pin: &str) {
        let InstanceKind::Leaf { pins, .. } = &inst.kind else {
            return;
        };
        let (values, count) = {
            let mut store = pins.borrow_mut();
            let Some(value) = store.consume([pin]).remove(pin) else {
                return;
            };
            let mut cycle = inst.cycle.borrow_mut();
            let Some(cached) = cycle.as_mut() else {
                return;
            };
            for input in &inst.definition.inputs {
                if inst.definition.is_reactive(&input.id) {
                    continue;
                }
                if let Some(latest) = store.latest(&input.id) {
                    cached.insert(input.id.clone(), latest.clone());
                }
            }
            let mut values = cached.clone();
            values.insert(pin.to_string(), value);
            (values, store.queued_count(pin))
        };
        self.tracer.emit(
            &inst.path,
            Some((pin, PinType::Input)),
            TraceEventKind::QueueChanged { count },
        );
        self.run_leaf(inst, values);
    }

    fn run_leaf(&self, inst: &Rc<InstanceRuntime>, values: HashMap<PinId, Value>) {
        let InstanceKind::Leaf { executor, .. } = &inst.kind else {
            return;
        };
        let executor = Rc::clone(executor);
        let firing = Rc::new(FiringState::default());
        let outputs = NodeOutputs::new(self.me.clone(), Rc::clone(&inst.path), Rc::clone(&firing));
        let ctx = ExecutionContext::new(
            self.me.clone(),
            Rc::clone(&inst.path),
            Rc::clone(&self.execution_id),
            inst.store.clone(),
            Rc::clone(&firing),
        );

        self.tracer.emit(&inst.path, None, TraceEventKind::Fired);
        log::debug!("Firing '{}' with {} input(s)", inst.key, values.len());

        inst.running.set(inst.running.get() + 1);
        let result = executor.run(&NodeInputs::new(values), &outputs, &ctx);
        inst.running.set(inst.running.get() - 1);

        if let Err(error) = result {
            self.raise(&inst.path, error, Some(firing.as_ref()));
        }
        firing.settle();
        if inst.running.get() == 0 {
            inst.set_state(Lifecycle::Pending);
        }
    }

    /// Entry point for values emitted through an `OutputSink`
    pub(crate) fn emit_from_node(
        &self,
        path: &InstancePath,
        pin: &str,
        value: Value,
        firing: &FiringState,
    ) {
        if pin == ERROR_PIN {
            self.raise(path, error_from_value(value), Some(firing));
            return;
        }
        let Some(inst) = self.instance(path) else {
            return;
        };
        if !inst.definition.has_output(pin) {
            log::warn!("'{}' emitted on undeclared output '{}'", inst.key, pin);
            return;
        }
        self.emit(&inst, pin, value);
    }

    /// Emit on an output pin, then record it for completion
    fn emit(&self, inst: &Rc<InstanceRuntime>, pin: &str, value: Value) {
        if !self.is_running() || inst.is_terminal() {
            log::debug!("Discarding '{}' on '{}': instance has terminated", pin, inst.key);
            return;
        }
        self.tracer.emit(
            &inst.path,
            Some((pin, PinType::Output)),
            TraceEventKind::OutputEmitted {
                value: value.clone(),
            },
        );
        self.route(inst, pin, value);

        let completed = inst
            .completion
            .borrow_mut()
            .as_mut()
            .is_some_and(|tracker| tracker.record(pin));
        if completed {
            self.complete(inst);
        }
    }

    fn route(&self, inst: &InstanceRuntime, pin: &str, value: Value) {
        for target in inst.targets(pin) {
            match target {
                Target::Input { path, pin } => self.deliver(&path, &pin, value.clone()),
                Target::Output { path, pin } if pin == ERROR_PIN => {
                    self.raise(&path, error_from_value(value.clone()), None);
                }
                Target::Output { path, pin } => {
                    if let Some(parent) = self.instance(&path) {
                        self.emit(&parent, &pin, value.clone());
                    }
                }
                Target::Boundary(pin) => {
                    if let Some(sink) = self.boundary_outputs.get(&pin) {
                        sink.push(value.clone());
                    }
                }
            }
        }
    }

    /// Report an error on an instance's error pin
    ///
    /// Caught errors are routed like values and suppress the rest of the
    /// originating firing; uncaught errors terminate the instance and
    /// bubble to its parent.
    pub(crate) fn raise(&self, path: &InstancePath, error: NodeError, firing: Option<&FiringState>) {
        let Some(inst) = self.instance(path) else {
            return;
        };
        if !self.is_running() || inst.is_terminal() {
            log::debug!("Ignoring error from terminated '{}': {}", inst.key, error);
            return;
        }
        let error = error.originating_at(&inst.key);
        self.trace_error(&inst, &error);

        if inst.catches_errors() {
            if let Some(firing) = firing {
                firing.mark_errored();
            }
            log::debug!("Error in '{}' caught by a connection: {}", inst.key, error);
            self.route(&inst, ERROR_PIN, error.to_value());
        } else {
            self.escalate(&inst, error);
        }
    }

    /// Terminate an instance for an uncaught error and bubble it upward
    fn escalate(&self, inst: &Rc<InstanceRuntime>, error: NodeError) {
        log::debug!("Uncaught error in '{}': {}", inst.key, error);
        self.teardown_subtree(&inst.path);
        self.terminate(inst, Lifecycle::Failed);
        match inst.path.parent() {
            Some(parent) => self.raise(&parent, error, None),
            None => {
                log::warn!("Run '{}' failed: {}", self.execution_id, error);
                self.finish(RunStatus::Failed(error));
            }
        }
    }

    fn trace_error(&self, inst: &InstanceRuntime, error: &NodeError) {
        self.tracer.emit(
            &inst.path,
            Some((ERROR_PIN, PinType::Output)),
            TraceEventKind::Error {
                error: error.to_value(),
            },
        );
    }

    fn complete(&self, inst: &Rc<InstanceRuntime>) {
        if inst.is_terminal() {
            return;
        }
        log::debug!("'{}' completed", inst.key);
        self.teardown_subtree(&inst.path);
        self.terminate(inst, Lifecycle::Completed);
        self.tracer.emit(&inst.path, None, TraceEventKind::Completed);
        if inst.path.parent().is_none() {
            self.finish(RunStatus::Completed);
        }
    }

    /// Move an instance to a terminal state and run its cleanups
    fn terminate(&self, inst: &InstanceRuntime, state: Lifecycle) {
        if inst.is_terminal() {
            return;
        }
        inst.state.set(state);
        inst.cycle.borrow_mut().take();
        let cleanups = std::mem::take(&mut *inst.cleanups.borrow_mut());
        for cleanup in cleanups {
            if let Err(error) = cleanup() {
                self.cleanup_failed(inst, error);
            }
        }
    }

    fn cleanup_failed(&self, inst: &InstanceRuntime, error: NodeError) {
        log::warn!("Cleanup for '{}' failed: {}", inst.key, error);
        self.tracer.emit(
            &inst.path,
            None,
            TraceEventKind::CleanupFailed {
                error: error.to_value(),
            },
        );
    }

    pub(crate) fn register_cleanup(&self, path: &InstancePath, cleanup: CleanupFn) {
        match self.instance(path) {
            Some(inst) if !inst.is_terminal() => inst.cleanups.borrow_mut().push(cleanup),
            Some(inst) => {
                if let Err(error) = cleanup() {
                    self.cleanup_failed(&inst, error);
                }
            }
            None => {
                if let Err(error) = cleanup() {
                    log::warn!("Cleanup for unknown instance '{}' failed: {}", path, error);
                }
            }
        }
    }

    /// Tear down every instance strictly inside `path`, in instantiation order
    fn teardown_subtree(&self, path: &InstancePath) {
        let descendants: Vec<InstancePath> = self
            .order
            .borrow()
            .iter()
            .filter(|p| p.is_descendant_of(path))
            .cloned()
            .collect();
        for descendant in descendants {
            if let Some(inst) = self.instance(&descendant) {
                self.terminate(&inst, Lifecycle::TornDown);
            }
        }
    }

    /// End the run: record the status, tear everything down, detach inputs
    pub(crate) fn finish(&self, status: RunStatus) {
        if !self.is_running() {
            return;
        }
        log::info!("Run '{}' finished: {:?}", self.execution_id, status);
        *self.status.borrow_mut() = status;
        for path in self.instance_paths() {
            if let Some(inst) = self.instance(&path) {
                self.terminate(&inst, Lifecycle::TornDown);
            }
        }
        self.unsubscribe_inputs();
    }
}

/// Turn a value emitted on an error pin back into an error
fn error_from_value(value: Value) -> NodeError {
    match serde_json::from_value::<NodeError>(value.clone()) {
        Ok(error) => error,
        Err(_) => match value.as_str() {
            Some(message) => NodeError::new(message),
            None => NodeError::new(value.to_string()).with_data(value),
        },
    }
}

/// Options for [`execute`]
#[derive(Default)]
pub struct ExecuteOptions {
    pub config: EngineConfig,
    /// Observer for trace events
    pub trace_sink: Option<Rc<dyn TraceSink>>,
    /// Scope for side channels and trace events; generated when absent
    pub execution_id: Option<String>,
    /// Registry to share with other runs
    pub side_channels: Option<Rc<SideChannelRegistry>>,
    /// Queue/sticky overrides for the root's input pins
    pub input_config: HashMap<PinId, PinConfig>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_trace_sink(mut self, sink: Rc<dyn TraceSink>) -> Self {
        self.trace_sink = Some(sink);
        self
    }

    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    pub fn with_side_channels(mut self, registry: Rc<SideChannelRegistry>) -> Self {
        self.side_channels = Some(registry);
        self
    }

    pub fn with_input_config(mut self, pin_id: impl Into<String>, config: PinConfig) -> Self {
        self.input_config.insert(pin_id.into(), config);
        self
    }
}

/// Run a node definition as a reactive process
///
/// Wires the definition (recursively, for composites), subscribes to the
/// input streams, fires any source instances, and returns a handle. Values
/// pushed into `inputs` afterwards are processed synchronously inside the
/// push call.
///
/// # Errors
///
/// Returns an error if a boundary stream names a pin the definition does not
/// declare, if the configuration is invalid, or if any composite in the tree
/// fails to wire.
pub fn execute(
    definition: Rc<NodeDefinition>,
    inputs: HashMap<PinId, Rc<dyn PinStream>>,
    outputs: HashMap<PinId, Rc<dyn PinStream>>,
    registry: NodeRegistry,
    options: ExecuteOptions,
) -> Result<ExecutionHandle> {
    options.config.validate()?;
    for pin in inputs.keys() {
        if definition.input(pin).is_none() {
            return Err(EngineError::UnknownBoundaryPin {
                node_id: definition.id.clone(),
                pin_id: pin.clone(),
                direction: "input",
            });
        }
    }
    for pin in outputs.keys() {
        if !definition.has_output(pin) {
            return Err(EngineError::UnknownBoundaryPin {
                node_id: definition.id.clone(),
                pin_id: pin.clone(),
                direction: "output",
            });
        }
    }

    let execution_id = options
        .execution_id
        .unwrap_or_else(|| format!("exec-{}", Uuid::new_v4()));
    let runtime = Runtime::new(
        execution_id,
        options.config,
        registry,
        options.trace_sink,
        options.side_channels.unwrap_or_default(),
        outputs,
    );

    let connected: HashSet<PinId> = inputs.keys().cloned().collect();
    let root = runtime.instantiate(
        InstancePath::root(),
        Rc::clone(&definition),
        &options.input_config,
        connected,
    )?;
    runtime.connect_boundary_outputs(&root);
    runtime.subscribe_inputs(inputs);

    log::info!(
        "Started run '{}' for '{}' ({} instance(s))",
        runtime.execution_id,
        definition.id,
        runtime.order.borrow().len()
    );
    runtime.kick_off();

    Ok(ExecutionHandle { runtime })
}

/// Caller's handle on a run
///
/// Dropping a handle whose run is still going tears it down.
pub struct ExecutionHandle {
    runtime: Rc<Runtime>,
}

impl ExecutionHandle {
    pub fn execution_id(&self) -> &str {
        &self.runtime.execution_id
    }

    /// Current outcome of the run
    pub fn status(&self) -> RunStatus {
        self.runtime.status.borrow().clone()
    }

    pub fn is_running(&self) -> bool {
        self.runtime.is_running()
    }

    /// Lifecycle of an instance; `None` if nothing was instantiated there
    pub fn lifecycle(&self, path: &InstancePath) -> Option<Lifecycle> {
        self.runtime.instance(path).map(|inst| inst.lifecycle())
    }

    /// Waiting value counts per input pin of a leaf instance
    pub fn queued_inputs(&self, path: &InstancePath) -> Option<HashMap<PinId, usize>> {
        let inst = self.runtime.instance(path)?;
        match &inst.kind {
            InstanceKind::Leaf { pins, .. } => Some(pins.borrow().queued_counts()),
            InstanceKind::Composite { .. } => None,
        }
    }

    /// Every instantiated path, in instantiation order
    pub fn instances(&self) -> Vec<InstancePath> {
        self.runtime.instance_paths()
    }

    /// Most recent trace events for an instance (dotted path)
    pub fn history(
        &self,
        instance: &str,
        pin_id: Option<&str>,
        pin_type: Option<PinType>,
        limit: usize,
    ) -> HistoryPage {
        self.runtime.tracer.history(instance, pin_id, pin_type, limit)
    }

    /// Stop the run, running every pending cleanup
    ///
    /// Does nothing if the run already ended.
    pub fn teardown(&self) {
        self.runtime.finish(RunStatus::TornDown);
    }
}

impl Drop for ExecutionHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for ExecutionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionHandle")
            .field("execution_id", &self.execution_id())
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::ValueStream;
    use crate::types::{InputPin, OutputPin};
    use serde_json::json;

    fn add() -> Rc<NodeDefinition> {
        Rc::new(
            NodeDefinition::code("Add", |inputs, outputs, _| {
                let a = inputs.require("n1")?.as_i64().unwrap_or_default();
                let b = inputs.require("n2")?.as_i64().unwrap_or_default();
                outputs.emit("r", json!(a + b));
                Ok(())
            })
            .with_input(InputPin::required("n1"))
            .with_input(InputPin::required("n2"))
            .with_output(OutputPin::new("r")),
        )
    }

    #[test]
    fn test_lifecycle_terminal_states() {
        assert!(Lifecycle::Completed.is_terminal());
        assert!(Lifecycle::Failed.is_terminal());
        assert!(Lifecycle::TornDown.is_terminal());
        assert!(!Lifecycle::Running.is_terminal());
        assert!(!Lifecycle::Pending.is_terminal());
    }

    #[test]
    fn test_unknown_boundary_pin() {
        let stream: Rc<dyn PinStream> = ValueStream::shared();
        let inputs = HashMap::from([("n3".to_string(), Rc::clone(&stream))]);
        let err = execute(add(), inputs, HashMap::new(), NodeRegistry::new(), ExecuteOptions::new())
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::UnknownBoundaryPin {
                direction: "input",
                ..
            }
        ));

        let outputs = HashMap::from([("x".to_string(), stream)]);
        let err = execute(add(), HashMap::new(), outputs, NodeRegistry::new(), ExecuteOptions::new())
            .unwrap_err();
        assert!(err.to_string().contains("no output pin 'x'"));
    }

    #[test]
    fn test_error_pin_is_a_valid_boundary_output() {
        let sink: Rc<dyn PinStream> = ValueStream::shared();
        let outputs = HashMap::from([(ERROR_PIN.to_string(), sink)]);
        let handle = execute(add(), HashMap::new(), outputs, NodeRegistry::new(), ExecuteOptions::new())
            .unwrap();
        assert!(handle.execution_id().starts_with("exec-"));
        assert_eq!(handle.status(), RunStatus::Running);
    }

    #[test]
    fn test_error_from_value_shapes() {
        let structured = error_from_value(json!({"message": "boom", "origin": "__root.a"}));
        assert_eq!(structured.message, "boom");
        assert_eq!(structured.origin.as_deref(), Some("__root.a"));

        assert_eq!(error_from_value(json!("plain")).message, "plain");

        let other = error_from_value(json!(42));
        assert_eq!(other.message, "42");
        assert_eq!(other.data, Some(json!(42)));
    }

    #[test]
    fn test_drop_tears_down_run() {
        let cleaned = Rc::new(Cell::new(0));
        let c = Rc::clone(&cleaned);
        let def = Rc::new(NodeDefinition::code("Source", move |_, _, ctx| {
            let c = Rc::clone(&c);
            ctx.on_cleanup(move || {
                c.set(c.get() + 1);
                Ok(())
            });
            Ok(())
        }));

        let handle = execute(def, HashMap::new(), HashMap::new(), NodeRegistry::new(), ExecuteOptions::new())
            .unwrap();
        assert_eq!(handle.lifecycle(&InstancePath::root()), Some(Lifecycle::Pending));
        drop(handle);
        assert_eq!(cleaned.get(), 1);
    }
}
