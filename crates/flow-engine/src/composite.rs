//! Composite graphs - nodes defined by an internal sub-graph
//!
//! A composite node owns a set of child instances and the connections
//! between them. Its own pins exist only at the boundary: each exposed
//! input forwards to a pin of a child instance, and each exposed output is
//! fed by a pin of a child instance.
//!
//! # Example
//!
//! ```ignore
//! let graph = CompositeGraph::new()
//!     .with_instances(vec![NodeInstance::new("add", "Add")])
//!     .expose_input("a", "add", "n1")
//!     .expose_input("b", "add", "n2")
//!     .expose_output("sum", "add", "r");
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::{Connection, NodeInstance, PinId};

/// Sub-graph of a composite node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeGraph {
    /// Child instances
    pub instances: Vec<NodeInstance>,
    /// Connections between child pins, in declaration order
    pub connections: Vec<Connection>,
    /// Composite input pins mapped onto child input pins
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exposed_inputs: Vec<PortMapping>,
    /// Child output pins mapped onto composite output pins
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exposed_outputs: Vec<PortMapping>,
}

impl CompositeGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the child instances
    pub fn with_instances(mut self, instances: Vec<NodeInstance>) -> Self {
        self.instances = instances;
        self
    }

    /// Set the connections
    pub fn with_connections(mut self, connections: Vec<Connection>) -> Self {
        self.connections = connections;
        self
    }

    /// Forward a composite input pin to a child input pin
    ///
    /// The same composite pin may be exposed several times to feed several
    /// children.
    pub fn expose_input(
        mut self,
        group_port_id: impl Into<String>,
        internal_node_id: impl Into<String>,
        internal_port_id: impl Into<String>,
    ) -> Self {
        self.exposed_inputs.push(PortMapping::new(
            internal_node_id,
            internal_port_id,
            group_port_id,
        ));
        self
    }

    /// Feed a composite output pin from a child output pin
    pub fn expose_output(
        mut self,
        group_port_id: impl Into<String>,
        internal_node_id: impl Into<String>,
        internal_port_id: impl Into<String>,
    ) -> Self {
        self.exposed_outputs.push(PortMapping::new(
            internal_node_id,
            internal_port_id,
            group_port_id,
        ));
        self
    }

    /// Find a child instance by ID
    pub fn find_instance(&self, instance_id: &str) -> Option<&NodeInstance> {
        self.instances.iter().find(|i| i.id == instance_id)
    }

    /// Get connections leaving an instance
    pub fn outgoing<'a>(&'a self, instance_id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| c.source == instance_id)
    }

    /// Get connections entering an instance
    pub fn incoming<'a>(&'a self, instance_id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| c.target == instance_id)
    }

    /// Input pins of a child that something feeds
    ///
    /// A connection always feeds its target pin. An exposed input feeds the
    /// child pin only when the composite's own pin is in `fed`.
    pub fn connected_inputs(&self, instance_id: &str, fed: &HashSet<PinId>) -> Vec<&str> {
        let mut pins: Vec<&str> = self
            .connections
            .iter()
            .filter(|c| c.target == instance_id)
            .map(|c| c.target_pin.as_str())
            .chain(
                self.exposed_inputs
                    .iter()
                    .filter(|m| {
                        m.internal_node_id == instance_id && fed.contains(&m.group_port_id)
                    })
                    .map(|m| m.internal_port_id.as_str()),
            )
            .collect();
        pins.sort_unstable();
        pins.dedup();
        pins
    }
}

/// Mapping between a composite-level pin and a child instance's pin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    /// The ID of the child instance that has the actual pin
    pub internal_node_id: String,
    /// The pin ID on the child instance
    pub internal_port_id: String,
    /// The pin ID as it appears on the composite node
    pub group_port_id: String,
}

impl PortMapping {
    /// Create a new port mapping
    pub fn new(
        internal_node_id: impl Into<String>,
        internal_port_id: impl Into<String>,
        group_port_id: impl Into<String>,
    ) -> Self {
        Self {
            internal_node_id: internal_node_id.into(),
            internal_port_id: internal_port_id.into(),
            group_port_id: group_port_id.into(),
        }
    }
}
