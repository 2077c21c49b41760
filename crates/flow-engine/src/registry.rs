//! Node definition registry
//!
//! Maps definition ids to [`NodeDefinition`]s so that instances inside
//! composite graphs can be resolved by `node_id` at wiring time.
//!
//! # Usage
//!
//! ```ignore
//! let mut registry = NodeRegistry::new();
//! registry.register(add_definition());
//! registry.merge(plugin_registry);
//! ```

use std::collections::HashMap;
use std::rc::Rc;

use crate::types::NodeDefinition;

/// Registry of node definitions
///
/// Registries can be composed by merging:
/// ```ignore
/// let mut registry = NodeRegistry::new();
/// // Register built-in nodes...
/// registry.merge(external_registry); // Add plugin nodes
/// ```
#[derive(Clone, Default)]
pub struct NodeRegistry {
    definitions: HashMap<String, Rc<NodeDefinition>>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition, replacing any previous one with the same id
    pub fn register(&mut self, definition: NodeDefinition) {
        self.register_shared(Rc::new(definition));
    }

    /// Register an already shared definition
    pub fn register_shared(&mut self, definition: Rc<NodeDefinition>) {
        if self.definitions.contains_key(&definition.id) {
            log::debug!("Replacing node definition '{}'", definition.id);
        }
        self.definitions.insert(definition.id.clone(), definition);
    }

    /// Look up a definition
    pub fn get(&self, node_id: &str) -> Option<Rc<NodeDefinition>> {
        self.definitions.get(node_id).cloned()
    }

    /// Check if a definition is registered
    pub fn has_node(&self, node_id: &str) -> bool {
        self.definitions.contains_key(node_id)
    }

    /// List all registered definition ids
    pub fn node_ids(&self) -> Vec<&str> {
        self.definitions.keys().map(|s| s.as_str()).collect()
    }

    /// Get definitions grouped by namespace
    ///
    /// Definitions without a namespace are grouped under the empty string.
    pub fn by_namespace(&self) -> HashMap<String, Vec<Rc<NodeDefinition>>> {
        let mut grouped: HashMap<String, Vec<Rc<NodeDefinition>>> = HashMap::new();
        for definition in self.definitions.values() {
            grouped
                .entry(definition.namespace.clone().unwrap_or_default())
                .or_default()
                .push(Rc::clone(definition));
        }
        grouped
    }

    /// Merge another registry into this one
    ///
    /// Entries from `other` override entries in `self` if they share the same id.
    pub fn merge(&mut self, other: NodeRegistry) {
        self.definitions.extend(other.definitions);
    }

    /// Number of registered definitions
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids = self.node_ids();
        ids.sort_unstable();
        f.debug_struct("NodeRegistry").field("definitions", &ids).finish()
    }
}
