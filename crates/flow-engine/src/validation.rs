//! Graph validation for node definitions and composite graphs
//!
//! Validates instance ids, definition references, connection endpoints,
//! exposed port mappings, and the reactive/completion declarations of a
//! definition. Cycles are legal: a flow graph may loop a node's output back
//! into its own inputs.

use std::collections::HashSet;

use crate::completion::CompletionPolicy;
use crate::composite::CompositeGraph;
use crate::registry::NodeRegistry;
use crate::types::{NodeBody, NodeDefinition, ERROR_PIN};

/// Validation error with location context
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Two instances in the same graph share an id
    DuplicateInstance { instance_id: String },
    /// An instance references a definition the registry does not know
    UnknownDefinition { instance_id: String, node_id: String },
    /// A connection references a non-existent instance
    UnknownInstance {
        connection: String,
        instance_id: String,
    },
    /// A connection or mapping references a pin the definition lacks
    UnknownPin {
        instance_id: String,
        pin_id: String,
        direction: &'static str,
    },
    /// An exposed composite pin is not declared on the composite definition
    UnknownExposedPin {
        node_id: String,
        pin_id: String,
        direction: &'static str,
    },
    /// A reactive input is not one of the definition's inputs
    InvalidReactiveInput { node_id: String, pin_id: String },
    /// A completion group names a pin that is not an output
    InvalidCompletionOutput { node_id: String, pin_id: String },
    /// A definition declares the same pin twice
    DuplicatePin { node_id: String, pin_id: String },
    /// A composite instantiates itself through its own sub-graph
    RecursiveComposite { path: String, node_id: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateInstance { instance_id } => {
                write!(f, "Instance id '{}' is used more than once", instance_id)
            }
            Self::UnknownDefinition {
                instance_id,
                node_id,
            } => {
                write!(
                    f,
                    "Instance '{}' uses unknown node definition '{}'",
                    instance_id, node_id
                )
            }
            Self::UnknownInstance {
                connection,
                instance_id,
            } => {
                write!(
                    f,
                    "Connection '{}' references unknown instance '{}'",
                    connection, instance_id
                )
            }
            Self::UnknownPin {
                instance_id,
                pin_id,
                direction,
            } => {
                write!(
                    f,
                    "Instance '{}' has no {} pin '{}'",
                    instance_id, direction, pin_id
                )
            }
            Self::UnknownExposedPin {
                node_id,
                pin_id,
                direction,
            } => {
                write!(
                    f,
                    "Composite '{}' exposes undeclared {} pin '{}'",
                    node_id, direction, pin_id
                )
            }
            Self::InvalidReactiveInput { node_id, pin_id } => {
                write!(
                    f,
                    "Reactive input '{}' is not an input of '{}'",
                    pin_id, node_id
                )
            }
            Self::InvalidCompletionOutput { node_id, pin_id } => {
                write!(
                    f,
                    "Completion output '{}' is not an output of '{}'",
                    pin_id, node_id
                )
            }
            Self::DuplicatePin { node_id, pin_id } => {
                write!(f, "Node '{}' declares pin '{}' twice", node_id, pin_id)
            }
            Self::RecursiveComposite { path, node_id } => {
                write!(
                    f,
                    "Instance '{}' would recursively instantiate composite '{}'",
                    path, node_id
                )
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a node definition on its own
///
/// Returns all validation errors found (not just the first).
pub fn validate_definition(definition: &NodeDefinition) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    validate_pin_uniqueness(definition, &mut errors);

    for pin_id in &definition.reactive_inputs {
        if definition.input(pin_id).is_none() {
            errors.push(ValidationError::InvalidReactiveInput {
                node_id: definition.id.clone(),
                pin_id: pin_id.clone(),
            });
        }
    }

    if let Some(groups) = &definition.completion_outputs {
        let policy = CompletionPolicy::parse(groups);
        let mut reported = HashSet::new();
        for pin_id in policy.pins() {
            if !definition.has_output(pin_id) && reported.insert(pin_id) {
                errors.push(ValidationError::InvalidCompletionOutput {
                    node_id: definition.id.clone(),
                    pin_id: pin_id.to_string(),
                });
            }
        }
    }

    if let NodeBody::Composite(graph) = &definition.body {
        validate_exposed_pins(definition, graph, &mut errors);
    }

    errors
}

/// Validate a composite graph against the registry that will resolve it
///
/// Returns all validation errors found (not just the first).
pub fn validate_composite(graph: &CompositeGraph, registry: &NodeRegistry) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    validate_instance_ids(graph, &mut errors);
    validate_definitions_known(graph, registry, &mut errors);
    validate_connections(graph, registry, &mut errors);
    validate_mappings(graph, registry, &mut errors);

    errors
}

fn validate_pin_uniqueness(definition: &NodeDefinition, errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();
    for id in definition.inputs.iter().map(|p| &p.id) {
        if !seen.insert(id.as_str()) {
            errors.push(ValidationError::DuplicatePin {
                node_id: definition.id.clone(),
                pin_id: id.clone(),
            });
        }
    }
    let mut seen = HashSet::new();
    for id in definition.outputs.iter().map(|p| &p.id) {
        if id == ERROR_PIN || !seen.insert(id.as_str()) {
            errors.push(ValidationError::DuplicatePin {
                node_id: definition.id.clone(),
                pin_id: id.clone(),
            });
        }
    }
}

/// Exposed composite pins must be declared on the composite itself
fn validate_exposed_pins(
    definition: &NodeDefinition,
    graph: &CompositeGraph,
    errors: &mut Vec<ValidationError>,
) {
    for mapping in &graph.exposed_inputs {
        if definition.input(&mapping.group_port_id).is_none() {
            errors.push(ValidationError::UnknownExposedPin {
                node_id: definition.id.clone(),
                pin_id: mapping.group_port_id.clone(),
                direction: "input",
            });
        }
    }
    for mapping in &graph.exposed_outputs {
        if !definition.has_output(&mapping.group_port_id) {
            errors.push(ValidationError::UnknownExposedPin {
                node_id: definition.id.clone(),
                pin_id: mapping.group_port_id.clone(),
                direction: "output",
            });
        }
    }
}

fn validate_instance_ids(graph: &CompositeGraph, errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();
    for instance in &graph.instances {
        if !seen.insert(instance.id.as_str()) {
            errors.push(ValidationError::DuplicateInstance {
                instance_id: instance.id.clone(),
            });
        }
    }
}

fn validate_definitions_known(
    graph: &CompositeGraph,
    registry: &NodeRegistry,
    errors: &mut Vec<ValidationError>,
) {
    for instance in &graph.instances {
        if !registry.has_node(&instance.node_id) {
            errors.push(ValidationError::UnknownDefinition {
                instance_id: instance.id.clone(),
                node_id: instance.node_id.clone(),
            });
        }
    }
}

/// Check that every connection endpoint exists, down to the pin
fn validate_connections(
    graph: &CompositeGraph,
    registry: &NodeRegistry,
    errors: &mut Vec<ValidationError>,
) {
    for connection in &graph.connections {
        let label = connection.to_string();

        match graph.find_instance(&connection.source) {
            None => errors.push(ValidationError::UnknownInstance {
                connection: label.clone(),
                instance_id: connection.source.clone(),
            }),
            Some(source) => {
                if let Some(def) = registry.get(&source.node_id) {
                    if !def.has_output(&connection.source_pin) {
                        errors.push(ValidationError::UnknownPin {
                            instance_id: source.id.clone(),
                            pin_id: connection.source_pin.clone(),
                            direction: "output",
                        });
                    }
                }
            }
        }

        match graph.find_instance(&connection.target) {
            None => errors.push(ValidationError::UnknownInstance {
                connection: label,
                instance_id: connection.target.clone(),
            }),
            Some(target) => {
                if let Some(def) = registry.get(&target.node_id) {
                    if def.input(&connection.target_pin).is_none() {
                        errors.push(ValidationError::UnknownPin {
                            instance_id: target.id.clone(),
                            pin_id: connection.target_pin.clone(),
                            direction: "input",
                        });
                    }
                }
            }
        }
    }
}

/// Check that exposed mappings land on real child pins
fn validate_mappings(
    graph: &CompositeGraph,
    registry: &NodeRegistry,
    errors: &mut Vec<ValidationError>,
) {
    let sides = graph
        .exposed_inputs
        .iter()
        .map(|m| (m, "input"))
        .chain(graph.exposed_outputs.iter().map(|m| (m, "output")));

    for (mapping, direction) in sides {
        let Some(child) = graph.find_instance(&mapping.internal_node_id) else {
            errors.push(ValidationError::UnknownInstance {
                connection: format!("{} port '{}'", direction, mapping.group_port_id),
                instance_id: mapping.internal_node_id.clone(),
            });
            continue;
        };
        let Some(def) = registry.get(&child.node_id) else {
            continue;
        };
        let exists = match direction {
            "input" => def.input(&mapping.internal_port_id).is_some(),
            _ => def.has_output(&mapping.internal_port_id),
        };
        if !exists {
            errors.push(ValidationError::UnknownPin {
                instance_id: child.id.clone(),
                pin_id: mapping.internal_port_id.clone(),
                direction,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Connection, InputPin, NodeInstance, OutputPin};

    fn make_test_registry() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        registry.register(
            NodeDefinition::code("Add", |_, _, _| Ok(()))
                .with_input(InputPin::required("n1"))
                .with_input(InputPin::required("n2"))
                .with_output(OutputPin::new("r")),
        );
        registry.register(
            NodeDefinition::code("Log", |_, _, _| Ok(())).with_input(InputPin::required("value")),
        );
        registry
    }

    #[test]
    fn test_valid_graph() {
        let graph = CompositeGraph::new()
            .with_instances(vec![NodeInstance::new("a", "Add"), NodeInstance::new("log", "Log")])
            .with_connections(vec![
                Connection::new("a", "r", "log", "value"),
                Connection::new("a", ERROR_PIN, "log", "value"),
            ])
            .expose_input("x", "a", "n1")
            .expose_output("sum", "a", "r");

        let errors = validate_composite(&graph, &make_test_registry());
        assert!(errors.is_empty(), "Expected no errors, got: {:?}", errors);
    }

    #[test]
    fn test_cycle_is_allowed() {
        let graph = CompositeGraph::new()
            .with_instances(vec![NodeInstance::new("a", "Add")])
            .with_connections(vec![Connection::new("a", "r", "a", "n1")]);

        assert!(validate_composite(&graph, &make_test_registry()).is_empty());
    }

    #[test]
    fn test_duplicate_and_unknown_definition() {
        let graph = CompositeGraph::new().with_instances(vec![
            NodeInstance::new("a", "Add"),
            NodeInstance::new("a", "Add"),
            NodeInstance::new("b", "Missing"),
        ]);

        let errors = validate_composite(&graph, &make_test_registry());
        assert_eq!(
            errors,
            vec![
                ValidationError::DuplicateInstance {
                    instance_id: "a".to_string()
                },
                ValidationError::UnknownDefinition {
                    instance_id: "b".to_string(),
                    node_id: "Missing".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_connection_references_missing_instance_and_pin() {
        let graph = CompositeGraph::new()
            .with_instances(vec![NodeInstance::new("a", "Add"), NodeInstance::new("log", "Log")])
            .with_connections(vec![
                Connection::new("a", "r", "missing", "in"),
                Connection::new("a", "nope", "log", "value"),
                Connection::new("a", "r", "log", "other"),
            ]);

        let errors = validate_composite(&graph, &make_test_registry());
        assert_eq!(errors.len(), 3);
        assert!(matches!(&errors[0], ValidationError::UnknownInstance { instance_id, .. } if instance_id == "missing"));
        assert!(matches!(&errors[1], ValidationError::UnknownPin { direction: "output", .. }));
        assert!(matches!(&errors[2], ValidationError::UnknownPin { direction: "input", .. }));
    }

    #[test]
    fn test_bad_mappings() {
        let graph = CompositeGraph::new()
            .with_instances(vec![NodeInstance::new("a", "Add")])
            .expose_input("x", "ghost", "n1")
            .expose_output("sum", "a", "n1");

        let errors = validate_composite(&graph, &make_test_registry());
        assert_eq!(errors.len(), 2);
        assert!(errors[1].to_string().contains("no output pin 'n1'"));
    }

    #[test]
    fn test_definition_declarations() {
        let def = NodeDefinition::code("Bad", |_, _, _| Ok(()))
            .with_input(InputPin::required("a"))
            .with_input(InputPin::required("a"))
            .with_output(OutputPin::new("done"))
            .with_reactive_inputs(["b"])
            .with_completion_outputs(["done", "done+never"]);

        let errors = validate_definition(&def);
        assert_eq!(
            errors,
            vec![
                ValidationError::DuplicatePin {
                    node_id: "Bad".to_string(),
                    pin_id: "a".to_string()
                },
                ValidationError::InvalidReactiveInput {
                    node_id: "Bad".to_string(),
                    pin_id: "b".to_string()
                },
                ValidationError::InvalidCompletionOutput {
                    node_id: "Bad".to_string(),
                    pin_id: "never".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_composite_exposes_undeclared_pin() {
        let graph = CompositeGraph::new()
            .with_instances(vec![NodeInstance::new("a", "Add")])
            .expose_input("x", "a", "n1")
            .expose_output("sum", "a", "r");
        let def = NodeDefinition::composite("Wrapper", graph).with_input(InputPin::required("x"));

        let errors = validate_definition(&def);
        assert_eq!(
            errors,
            vec![ValidationError::UnknownExposedPin {
                node_id: "Wrapper".to_string(),
                pin_id: "sum".to_string(),
                direction: "output"
            }]
        );
    }
}
