//! Fluent builder for composite nodes
//!
//! Provides a fluent API for constructing composite definitions
//! programmatically.

use crate::composite::CompositeGraph;
use crate::registry::NodeRegistry;
use crate::types::{
    Connection, InputPin, NodeBody, NodeDefinition, NodeInstance, OutputPin, PinConfig,
};
use crate::validation::{validate_composite, validate_definition, ValidationError};

/// Fluent builder for composite node definitions
///
/// # Example
///
/// ```ignore
/// let def = CompositeBuilder::new("AddThree")
///     .add_input(InputPin::required("a"))
///     .add_output(OutputPin::new("sum"))
///     .add_instance("first", "Add", (0.0, 0.0))
///     .add_instance("second", "Add", (200.0, 0.0))
///     .with_pin_config("n2", PinConfig::Sticky)
///     .connect("first", "r", "second", "n1")
///     .expose_input("a", "first", "n1")
///     .expose_output("sum", "second", "r")
///     .build();
/// ```
pub struct CompositeBuilder {
    definition: NodeDefinition,
    graph: CompositeGraph,
}

impl CompositeBuilder {
    /// Create a new composite builder
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            definition: NodeDefinition::composite(id, CompositeGraph::new()),
            graph: CompositeGraph::new(),
        }
    }

    /// Set the namespace
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.definition.namespace = Some(namespace.into());
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.definition.description = Some(description.into());
        self
    }

    /// Declare an input pin of the composite
    pub fn add_input(mut self, pin: InputPin) -> Self {
        self.definition.inputs.push(pin);
        self
    }

    /// Declare an output pin of the composite
    pub fn add_output(mut self, pin: OutputPin) -> Self {
        self.definition.outputs.push(pin);
        self
    }

    /// Declare completion groups of the composite
    pub fn with_completion_outputs<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.definition.completion_outputs = Some(groups.into_iter().map(Into::into).collect());
        self
    }

    /// Add a child instance
    pub fn add_instance(
        mut self,
        id: impl Into<String>,
        node_id: impl Into<String>,
        position: (f64, f64),
    ) -> Self {
        let mut instance = NodeInstance::new(id, node_id);
        instance.position = position;
        self.graph.instances.push(instance);
        self
    }

    /// Override a pin's storage mode on the most recently added instance
    ///
    /// Must be called immediately after `add_instance`.
    pub fn with_pin_config(mut self, pin_id: impl Into<String>, config: PinConfig) -> Self {
        if let Some(instance) = self.graph.instances.last_mut() {
            instance.input_config.insert(pin_id.into(), config);
        }
        self
    }

    /// Connect a child output to a child input
    pub fn connect(
        mut self,
        source: impl Into<String>,
        source_pin: impl Into<String>,
        target: impl Into<String>,
        target_pin: impl Into<String>,
    ) -> Self {
        self.graph
            .connections
            .push(Connection::new(source, source_pin, target, target_pin));
        self
    }

    /// Add a connection that editors should not draw
    pub fn connect_hidden(
        mut self,
        source: impl Into<String>,
        source_pin: impl Into<String>,
        target: impl Into<String>,
        target_pin: impl Into<String>,
    ) -> Self {
        let mut connection = Connection::new(source, source_pin, target, target_pin);
        connection.hidden = true;
        self.graph.connections.push(connection);
        self
    }

    /// Forward a composite input to a child input
    pub fn expose_input(
        mut self,
        group_port_id: impl Into<String>,
        internal_node_id: impl Into<String>,
        internal_port_id: impl Into<String>,
    ) -> Self {
        self.graph = self
            .graph
            .expose_input(group_port_id, internal_node_id, internal_port_id);
        self
    }

    /// Feed a composite output from a child output
    pub fn expose_output(
        mut self,
        group_port_id: impl Into<String>,
        internal_node_id: impl Into<String>,
        internal_port_id: impl Into<String>,
    ) -> Self {
        self.graph = self
            .graph
            .expose_output(group_port_id, internal_node_id, internal_port_id);
        self
    }

    /// Build the definition without validation
    pub fn build(mut self) -> NodeDefinition {
        self.definition.body = NodeBody::Composite(self.graph);
        self.definition
    }

    /// Build the definition, checking it against the registry that will
    /// resolve its children
    pub fn build_validated(
        self,
        registry: &NodeRegistry,
    ) -> std::result::Result<NodeDefinition, Vec<ValidationError>> {
        let definition = self.build();
        let mut errors = validate_definition(&definition);
        if let NodeBody::Composite(graph) = &definition.body {
            errors.extend(validate_composite(graph, registry));
        }
        if errors.is_empty() {
            Ok(definition)
        } else {
            Err(errors)
        }
    }
}
