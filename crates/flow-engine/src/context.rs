//! Handles passed to a node computation
//!
//! Every firing receives its consumed [`NodeInputs`], a [`NodeOutputs`]
//! collection of sinks, and an [`ExecutionContext`]. Sinks and the context
//! may be cloned into callbacks (timers, subscriptions) to emit or report
//! later; they reference the run weakly, so once it has ended their
//! emissions are discarded.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use serde_json::Value;

use crate::engine::Runtime;
use crate::error::NodeError;
use crate::side_channel::{ChannelKey, ChannelSubscription};
use crate::types::{InstanceId, InstancePath, PinId};

/// Per-firing flags shared by the sinks and context of one firing
///
/// A caught error only suppresses emissions made by the synchronous body of
/// `run`. Once the body has returned the firing is settled, and later
/// callback emissions are independent propagations.
#[derive(Debug, Default)]
pub(crate) struct FiringState {
    errored: Cell<bool>,
    settled: Cell<bool>,
}

impl FiringState {
    pub(crate) fn mark_errored(&self) {
        if !self.settled.get() {
            self.errored.set(true);
        }
    }

    /// Called once the body of `run` has returned
    pub(crate) fn settle(&self) {
        self.settled.set(true);
        self.errored.set(false);
    }

    pub(crate) fn is_errored(&self) -> bool {
        self.errored.get()
    }
}

/// Values consumed by one firing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeInputs {
    values: HashMap<PinId, Value>,
}

impl NodeInputs {
    pub(crate) fn new(values: HashMap<PinId, Value>) -> Self {
        Self { values }
    }

    /// Value of a pin, if the firing received one
    pub fn get(&self, pin_id: &str) -> Option<&Value> {
        self.values.get(pin_id)
    }

    /// Value of a pin, or an error naming the missing pin
    pub fn require(&self, pin_id: &str) -> Result<&Value, NodeError> {
        self.values
            .get(pin_id)
            .ok_or_else(|| NodeError::new(format!("Missing input '{}'", pin_id)))
    }

    pub fn contains(&self, pin_id: &str) -> bool {
        self.values.contains_key(pin_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Emitter for one output pin
///
/// Cheap to clone; clones may outlive the firing that created them.
#[derive(Clone)]
pub struct OutputSink {
    runtime: Weak<Runtime>,
    path: Rc<InstancePath>,
    pin_id: PinId,
    firing: Rc<FiringState>,
}

impl OutputSink {
    /// Emit a value downstream, synchronously
    ///
    /// Dropped if the body of the firing reported a caught error, or if the
    /// run has ended.
    pub fn emit(&self, value: Value) {
        if self.firing.is_errored() {
            log::debug!(
                "Suppressing '{}' on '{}' after error in the same firing",
                self.pin_id,
                self.path
            );
            return;
        }
        match self.runtime.upgrade() {
            Some(runtime) => runtime.emit_from_node(&self.path, &self.pin_id, value, &self.firing),
            None => log::debug!("Discarding '{}' on '{}': run has ended", self.pin_id, self.path),
        }
    }

    /// Pin this sink emits on
    pub fn pin_id(&self) -> &str {
        &self.pin_id
    }
}

/// Output sinks for one firing
pub struct NodeOutputs {
    runtime: Weak<Runtime>,
    path: Rc<InstancePath>,
    firing: Rc<FiringState>,
}

impl NodeOutputs {
    pub(crate) fn new(runtime: Weak<Runtime>, path: Rc<InstancePath>, firing: Rc<FiringState>) -> Self {
        Self {
            runtime,
            path,
            firing,
        }
    }

    /// A sink for one output pin, suitable for keeping in a callback
    pub fn sink(&self, pin_id: &str) -> OutputSink {
        OutputSink {
            runtime: self.runtime.clone(),
            path: Rc::clone(&self.path),
            pin_id: pin_id.to_string(),
            firing: Rc::clone(&self.firing),
        }
    }

    /// Emit on a pin right away
    pub fn emit(&self, pin_id: &str, value: Value) {
        self.sink(pin_id).emit(value);
    }
}

/// Private key/value state of one instance
///
/// Shared across every firing of the instance; dropped with the run.
#[derive(Debug, Clone, Default)]
pub struct StateStore {
    values: Rc<RefCell<HashMap<String, Value>>>,
}

impl StateStore {
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.borrow().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.values.borrow_mut().insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values.borrow_mut().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.borrow().contains_key(key)
    }

    pub fn clear(&self) {
        self.values.borrow_mut().clear();
    }
}

/// Callback run when an instance's lifecycle ends
pub type CleanupFn = Box<dyn FnOnce() -> Result<(), NodeError>>;

/// Per-firing view of the instance's resources
#[derive(Clone)]
pub struct ExecutionContext {
    runtime: Weak<Runtime>,
    path: Rc<InstancePath>,
    execution_id: Rc<str>,
    state: StateStore,
    firing: Rc<FiringState>,
}

impl ExecutionContext {
    pub(crate) fn new(
        runtime: Weak<Runtime>,
        path: Rc<InstancePath>,
        execution_id: Rc<str>,
        state: StateStore,
        firing: Rc<FiringState>,
    ) -> Self {
        Self {
            runtime,
            path,
            execution_id,
            state,
            firing,
        }
    }

    /// The instance's private state
    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Report a failure for this firing
    ///
    /// Same effect as returning `Err` from `run`.
    pub fn report_error(&self, error: impl Into<NodeError>) {
        match self.runtime.upgrade() {
            Some(runtime) => runtime.raise(&self.path, error.into(), Some(self.firing.as_ref())),
            None => log::debug!("Discarding error from '{}': run has ended", self.path),
        }
    }

    /// Register a callback to run once when the instance's lifecycle ends
    ///
    /// Runs immediately if the instance has already terminated.
    pub fn on_cleanup<F>(&self, cleanup: F)
    where
        F: FnOnce() -> Result<(), NodeError> + 'static,
    {
        match self.runtime.upgrade() {
            Some(runtime) => runtime.register_cleanup(&self.path, Box::new(cleanup)),
            None => {
                if let Err(e) = cleanup() {
                    log::warn!("Cleanup for '{}' failed after run ended: {}", self.path, e);
                }
            }
        }
    }

    /// Whether the instance can still fire and emit
    pub fn is_active(&self) -> bool {
        self.runtime
            .upgrade()
            .is_some_and(|runtime| runtime.is_live(&self.path))
    }

    /// Ids of the enclosing instances, outermost first
    pub fn ancestors(&self) -> &[InstanceId] {
        self.path.ancestors()
    }

    /// The instance's own id
    pub fn instance_id(&self) -> &str {
        self.path.instance_id()
    }

    /// Full path of the instance
    pub fn path(&self) -> &InstancePath {
        &self.path
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    fn channel(&self, key: &str) -> ChannelKey {
        ChannelKey::new(
            format!("{}/{}", self.execution_id, self.path.ancestors().join(".")),
            key,
        )
    }

    /// Publish on a side channel shared with sibling instances
    ///
    /// Returns the number of subscribers reached.
    pub fn publish(&self, key: &str, value: &Value) -> usize {
        match self.runtime.upgrade() {
            Some(runtime) => runtime.side_channels().publish(&self.channel(key), value),
            None => 0,
        }
    }

    /// Subscribe to a side channel
    ///
    /// The subscription is removed automatically when the instance's
    /// lifecycle ends.
    pub fn subscribe<F>(&self, key: &str, handler: F) -> Option<ChannelSubscription>
    where
        F: Fn(&Value) + 'static,
    {
        let runtime = self.runtime.upgrade()?;
        let registry = Rc::clone(runtime.side_channels());
        let subscription = registry.subscribe(self.channel(key), Rc::new(handler));
        let token = subscription.clone();
        self.on_cleanup(move || {
            registry.unsubscribe(&token);
            Ok(())
        });
        Some(subscription)
    }
}
