//! Graph wiring
//!
//! Instantiates a definition at a path: leaves get a pin store, composites
//! are validated and their children instantiated recursively before the
//! connections between them are turned into routes. Instantiation is keyed
//! by path, so instantiating an existing path returns the existing instance.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::composite::CompositeGraph;
use crate::engine::{InstanceKind, InstanceRuntime, Runtime, Target};
use crate::error::{EngineError, Result};
use crate::pins::PinStore;
use crate::types::{InstancePath, NodeBody, NodeDefinition, PinConfig, PinId};
use crate::validation::{validate_composite, validate_definition, ValidationError};

impl Runtime {
    /// Instantiate `definition` at `path`
    ///
    /// `overrides` are the instance's queue/sticky settings and `connected`
    /// the input pins something feeds. For a composite, only children behind
    /// a fed composite pin count as fed through it.
    pub(crate) fn instantiate(
        &self,
        path: InstancePath,
        definition: Rc<NodeDefinition>,
        overrides: &HashMap<PinId, PinConfig>,
        connected: HashSet<PinId>,
    ) -> Result<Rc<InstanceRuntime>> {
        if let Some(existing) = self.instance(&path) {
            log::debug!("Reusing existing instance '{}'", path);
            return Ok(existing);
        }

        let errors = validate_definition(&definition);
        if !errors.is_empty() {
            return Err(EngineError::Wiring {
                scope: path.to_string(),
                errors,
            });
        }

        match &definition.body {
            NodeBody::Code(executor) => {
                let pins =
                    PinStore::new(&definition.inputs, overrides, self.config.default_pin_config);
                let kind = InstanceKind::Leaf {
                    pins: RefCell::new(pins),
                    connected,
                    executor: Rc::clone(executor),
                };
                let instance = InstanceRuntime::new(path, Rc::clone(&definition), kind);
                self.insert_instance(Rc::clone(&instance));
                Ok(instance)
            }
            NodeBody::Composite(graph) => {
                self.instantiate_composite(path, &definition, graph, &connected)
            }
        }
    }

    fn instantiate_composite(
        &self,
        path: InstancePath,
        definition: &Rc<NodeDefinition>,
        graph: &CompositeGraph,
        connected: &HashSet<PinId>,
    ) -> Result<Rc<InstanceRuntime>> {
        self.check_recursion(&path, &definition.id)?;

        let errors = validate_composite(graph, &self.registry);
        if !errors.is_empty() {
            return Err(EngineError::Wiring {
                scope: path.to_string(),
                errors,
            });
        }

        let mut input_forwards: HashMap<PinId, Vec<(InstancePath, PinId)>> = HashMap::new();
        for mapping in &graph.exposed_inputs {
            input_forwards
                .entry(mapping.group_port_id.clone())
                .or_default()
                .push((
                    path.child(&mapping.internal_node_id),
                    mapping.internal_port_id.clone(),
                ));
        }
        let composite = InstanceRuntime::new(
            path.clone(),
            Rc::clone(definition),
            InstanceKind::Composite { input_forwards },
        );
        // Registered before the children so teardown runs outside-in
        self.insert_instance(Rc::clone(&composite));

        for child in &graph.instances {
            let child_definition = self.registry.get(&child.node_id).ok_or_else(|| {
                EngineError::wiring(
                    path.to_string(),
                    ValidationError::UnknownDefinition {
                        instance_id: child.id.clone(),
                        node_id: child.node_id.clone(),
                    },
                )
            })?;
            let connected = graph
                .connected_inputs(&child.id, connected)
                .into_iter()
                .map(str::to_string)
                .collect();
            self.instantiate(
                path.child(&child.id),
                child_definition,
                &child.input_config,
                connected,
            )?;
        }

        for connection in &graph.connections {
            if let Some(source) = self.instance(&path.child(&connection.source)) {
                source.add_route(
                    &connection.source_pin,
                    Target::Input {
                        path: path.child(&connection.target),
                        pin: connection.target_pin.clone(),
                    },
                );
            }
        }
        for mapping in &graph.exposed_outputs {
            if let Some(source) = self.instance(&path.child(&mapping.internal_node_id)) {
                source.add_route(
                    &mapping.internal_port_id,
                    Target::Output {
                        path: path.clone(),
                        pin: mapping.group_port_id.clone(),
                    },
                );
            }
        }

        log::debug!(
            "Wired composite '{}' at '{}': {} instance(s), {} connection(s)",
            definition.id,
            path,
            graph.instances.len(),
            graph.connections.len()
        );
        Ok(composite)
    }

    /// Reject a composite that already appears among its own ancestors
    fn check_recursion(&self, path: &InstancePath, node_id: &str) -> Result<()> {
        let mut ancestor = path.parent();
        while let Some(current) = ancestor {
            if self
                .instance(&current)
                .is_some_and(|inst| inst.definition.id == node_id)
            {
                return Err(EngineError::wiring(
                    path.to_string(),
                    ValidationError::RecursiveComposite {
                        path: path.to_string(),
                        node_id: node_id.to_string(),
                    },
                ));
            }
            ancestor = current.parent();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::registry::NodeRegistry;
    use crate::side_channel::SideChannelRegistry;
    use crate::stream::{PinStream, ValueStream};
    use crate::types::{Connection, InputPin, NodeInstance, OutputPin};
    use serde_json::{json, Value};
    use std::cell::Cell;

    fn registry(calls: Rc<Cell<usize>>) -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        registry.register(
            NodeDefinition::code("Double", move |inputs, outputs, _| {
                calls.set(calls.get() + 1);
                let n = inputs.require("n")?.as_i64().unwrap_or_default();
                outputs.emit("r", json!(n * 2));
                Ok(())
            })
            .with_input(InputPin::required("n"))
            .with_output(OutputPin::new("r")),
        );
        registry
    }

    fn twice() -> Rc<NodeDefinition> {
        let graph = CompositeGraph::new()
            .with_instances(vec![
                NodeInstance::new("first", "Double"),
                NodeInstance::new("second", "Double"),
            ])
            .with_connections(vec![Connection::new("first", "r", "second", "n")])
            .expose_input("n", "first", "n")
            .expose_output("r", "second", "r");
        Rc::new(
            NodeDefinition::composite("Quadruple", graph)
                .with_input(InputPin::required("n"))
                .with_output(OutputPin::new("r")),
        )
    }

    fn runtime(registry: NodeRegistry, sink: Rc<ValueStream>) -> Rc<Runtime> {
        let outputs: HashMap<PinId, Rc<dyn PinStream>> =
            HashMap::from([("r".to_string(), sink as Rc<dyn PinStream>)]);
        Runtime::new(
            "exec-wiring".to_string(),
            EngineConfig::default(),
            registry,
            None,
            Rc::new(SideChannelRegistry::new()),
            outputs,
        )
    }

    #[test]
    fn test_instantiation_is_idempotent() {
        let calls = Rc::new(Cell::new(0));
        let sink = ValueStream::shared();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        sink.subscribe(Rc::new(move |v: &Value| s.borrow_mut().push(v.clone())));

        let runtime = runtime(registry(Rc::clone(&calls)), sink);
        let connected: HashSet<PinId> = ["n".to_string()].into_iter().collect();
        let root = InstancePath::root();

        let first = runtime
            .instantiate(root.clone(), twice(), &HashMap::new(), connected.clone())
            .unwrap();
        let second = runtime
            .instantiate(root.clone(), twice(), &HashMap::new(), connected)
            .unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(
            runtime.instance_paths(),
            vec![root.clone(), root.child("first"), root.child("second")]
        );

        runtime.connect_boundary_outputs(&first);
        runtime.deliver(&root, "n", json!(3));

        assert_eq!(*seen.borrow(), vec![json!(12)]);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_unknown_definition_fails_fast() {
        let graph = CompositeGraph::new().with_instances(vec![NodeInstance::new("x", "Nope")]);
        let def = Rc::new(NodeDefinition::composite("Broken", graph));
        let runtime = runtime(NodeRegistry::new(), ValueStream::shared());

        let result =
            runtime.instantiate(InstancePath::root(), def, &HashMap::new(), HashSet::new());
        let Err(err) = result else {
            panic!("broken composite was instantiated");
        };
        match err {
            EngineError::Wiring { scope, errors } => {
                assert_eq!(scope, "__root");
                assert!(matches!(errors[0], ValidationError::UnknownDefinition { .. }));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_recursive_composite_is_rejected() {
        let graph = CompositeGraph::new().with_instances(vec![NodeInstance::new("inner", "Loop")]);
        let looping = NodeDefinition::composite("Loop", graph);
        let mut registry = NodeRegistry::new();
        registry.register(looping.clone());
        let runtime = runtime(registry, ValueStream::shared());

        let result = runtime.instantiate(
            InstancePath::root(),
            Rc::new(looping),
            &HashMap::new(),
            HashSet::new(),
        );
        let Err(err) = result else {
            panic!("recursive composite was instantiated");
        };
        assert!(err.to_string().contains("recursively instantiate composite 'Loop'"));
    }
}
