//! Core types for flow graphs
//!
//! These types define node definitions, their pins, placed instances,
//! connections, and the namespaced instance paths used at runtime.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::composite::CompositeGraph;
use crate::context::{ExecutionContext, NodeInputs, NodeOutputs};
use crate::error::NodeError;

/// Identifier of an instance within its enclosing graph
pub type InstanceId = String;

/// Identifier of a pin on a node
pub type PinId = String;

/// Reserved output pin present on every instance
pub const ERROR_PIN: &str = "__error";

/// Instance id given to the node passed to `execute`
pub const ROOT_INSTANCE_ID: &str = "__root";

/// How an input pin participates in readiness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputMode {
    /// Must hold a value before the node can fire
    #[default]
    Required,
    /// Never blocks firing
    Optional,
    /// Required only when something is connected to it
    RequiredIfConnected,
}

/// How an input pin stores arriving values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinConfig {
    /// FIFO buffer, one value consumed per firing
    #[default]
    Queue,
    /// Latest value only, reused across firings
    Sticky,
}

/// Direction of a pin, as reported in trace events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinType {
    Input,
    Output,
}

/// Definition of an input pin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputPin {
    /// Pin identifier
    pub id: PinId,
    /// Readiness mode
    #[serde(default)]
    pub mode: InputMode,
    /// Optional description shown by editors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl InputPin {
    /// Create a pin with an explicit mode
    pub fn new(id: impl Into<String>, mode: InputMode) -> Self {
        Self {
            id: id.into(),
            mode,
            description: None,
        }
    }

    /// Create a required pin
    pub fn required(id: impl Into<String>) -> Self {
        Self::new(id, InputMode::Required)
    }

    /// Create an optional pin
    pub fn optional(id: impl Into<String>) -> Self {
        Self::new(id, InputMode::Optional)
    }

    /// Create a pin that is required only when connected
    pub fn required_if_connected(id: impl Into<String>) -> Self {
        Self::new(id, InputMode::RequiredIfConnected)
    }

    /// Attach a description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Definition of an output pin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputPin {
    /// Pin identifier
    pub id: PinId,
    /// Optional description shown by editors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl OutputPin {
    /// Create an output pin
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: None,
        }
    }

    /// Attach a description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Synchronous node computation
///
/// `run` is called once per firing. It may emit any number of values on
/// `outputs`, and may keep clones of the output sinks or the context to emit
/// later from a callback.
pub trait NodeExecutor {
    fn run(
        &self,
        inputs: &NodeInputs,
        outputs: &NodeOutputs,
        ctx: &ExecutionContext,
    ) -> Result<(), NodeError>;
}

impl<F> NodeExecutor for F
where
    F: Fn(&NodeInputs, &NodeOutputs, &ExecutionContext) -> Result<(), NodeError>,
{
    fn run(
        &self,
        inputs: &NodeInputs,
        outputs: &NodeOutputs,
        ctx: &ExecutionContext,
    ) -> Result<(), NodeError> {
        self(inputs, outputs, ctx)
    }
}

/// What a node does when it fires
#[derive(Clone)]
pub enum NodeBody {
    /// Leaf node backed by code
    Code(Rc<dyn NodeExecutor>),
    /// Node defined by an internal sub-graph
    Composite(CompositeGraph),
}

impl fmt::Debug for NodeBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Code(_) => f.write_str("Code(..)"),
            Self::Composite(graph) => f.debug_tuple("Composite").field(graph).finish(),
        }
    }
}

/// Immutable description of a unit of computation
#[derive(Debug, Clone)]
pub struct NodeDefinition {
    /// Unique identifier, referenced by `NodeInstance::node_id`
    pub id: String,
    /// Grouping namespace (e.g. "Control Flow")
    pub namespace: Option<String>,
    /// What the node does
    pub description: Option<String>,
    /// Ordered input pins
    pub inputs: Vec<InputPin>,
    /// Output pins (the error pin is implicit)
    pub outputs: Vec<OutputPin>,
    /// Inputs whose arrival triggers an immediate evaluation
    pub reactive_inputs: Vec<PinId>,
    /// Completion groups; each entry is pin ids joined by `+`
    pub completion_outputs: Option<Vec<String>>,
    /// Computation or sub-graph
    pub body: NodeBody,
}

impl NodeDefinition {
    /// Create a code node from a closure
    pub fn code<F>(id: impl Into<String>, run: F) -> Self
    where
        F: Fn(&NodeInputs, &NodeOutputs, &ExecutionContext) -> Result<(), NodeError> + 'static,
    {
        Self::with_body(id, NodeBody::Code(Rc::new(run)))
    }

    /// Create a code node from any executor implementation
    pub fn from_executor(id: impl Into<String>, executor: impl NodeExecutor + 'static) -> Self {
        Self::with_body(id, NodeBody::Code(Rc::new(executor)))
    }

    /// Create a composite node
    pub fn composite(id: impl Into<String>, graph: CompositeGraph) -> Self {
        Self::with_body(id, NodeBody::Composite(graph))
    }

    fn with_body(id: impl Into<String>, body: NodeBody) -> Self {
        Self {
            id: id.into(),
            namespace: None,
            description: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            reactive_inputs: Vec::new(),
            completion_outputs: None,
            body,
        }
    }

    /// Add an input pin
    pub fn with_input(mut self, pin: InputPin) -> Self {
        self.inputs.push(pin);
        self
    }

    /// Add an output pin
    pub fn with_output(mut self, pin: OutputPin) -> Self {
        self.outputs.push(pin);
        self
    }

    /// Declare reactive inputs
    pub fn with_reactive_inputs<I, S>(mut self, pins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reactive_inputs = pins.into_iter().map(Into::into).collect();
        self
    }

    /// Declare completion outputs
    pub fn with_completion_outputs<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.completion_outputs = Some(groups.into_iter().map(Into::into).collect());
        self
    }

    /// Set the namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Find an input pin by id
    pub fn input(&self, pin_id: &str) -> Option<&InputPin> {
        self.inputs.iter().find(|p| p.id == pin_id)
    }

    /// Whether the node declares this output (the error pin always exists)
    pub fn has_output(&self, pin_id: &str) -> bool {
        pin_id == ERROR_PIN || self.outputs.iter().any(|p| p.id == pin_id)
    }

    /// Whether the pin is reactive
    pub fn is_reactive(&self, pin_id: &str) -> bool {
        self.reactive_inputs.iter().any(|p| p == pin_id)
    }

    /// Whether this node is defined by a sub-graph
    pub fn is_composite(&self) -> bool {
        matches!(self.body, NodeBody::Composite(_))
    }
}

/// A placed occurrence of a node definition inside a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInstance {
    /// Unique identifier within the enclosing graph
    pub id: InstanceId,
    /// Definition id (resolved through the registry)
    pub node_id: String,
    /// Per-pin queue/sticky overrides
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub input_config: HashMap<PinId, PinConfig>,
    /// Position in the editor (x, y); not used by execution
    #[serde(default)]
    pub position: (f64, f64),
}

impl NodeInstance {
    /// Create an instance of a definition
    pub fn new(id: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_id: node_id.into(),
            input_config: HashMap::new(),
            position: (0.0, 0.0),
        }
    }

    /// Override the storage mode of one input pin
    pub fn with_pin_config(mut self, pin_id: impl Into<String>, config: PinConfig) -> Self {
        self.input_config.insert(pin_id.into(), config);
        self
    }
}

/// A directed edge from an output pin to an input pin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Source instance id
    pub source: InstanceId,
    /// Source output pin (may be the error pin)
    pub source_pin: PinId,
    /// Target instance id
    pub target: InstanceId,
    /// Target input pin
    pub target_pin: PinId,
    /// Hidden from the editor; no effect on execution
    #[serde(default)]
    pub hidden: bool,
}

impl Connection {
    /// Create a visible connection
    pub fn new(
        source: impl Into<String>,
        source_pin: impl Into<String>,
        target: impl Into<String>,
        target_pin: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            source_pin: source_pin.into(),
            target: target.into(),
            target_pin: target_pin.into(),
            hidden: false,
        }
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}.{}",
            self.source, self.source_pin, self.target, self.target_pin
        )
    }
}

/// Chain of instance ids from the execution root down to an instance
///
/// The dotted rendering (`__root.outer.add`) is the namespaced instance id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstancePath(Vec<InstanceId>);

impl InstancePath {
    /// Path of the instance passed to `execute`
    pub fn root() -> Self {
        Self(vec![ROOT_INSTANCE_ID.to_string()])
    }

    /// Build a path from its segments
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Path of a child instance
    pub fn child(&self, instance_id: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(instance_id.to_string());
        Self(segments)
    }

    /// Path of the enclosing instance, if any
    pub fn parent(&self) -> Option<Self> {
        if self.0.len() > 1 {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        } else {
            None
        }
    }

    /// The instance's own (local) id
    pub fn instance_id(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    /// Ids of all enclosing instances, outermost first
    pub fn ancestors(&self) -> &[InstanceId] {
        &self.0[..self.0.len().saturating_sub(1)]
    }

    /// All segments including the instance itself
    pub fn segments(&self) -> &[InstanceId] {
        &self.0
    }

    /// Nesting depth (the root is 1)
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Whether `self` lies strictly inside `other`
    pub fn is_descendant_of(&self, other: &InstancePath) -> bool {
        self.0.len() > other.0.len() && self.0.starts_with(&other.0)
    }
}

impl fmt::Display for InstancePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}
