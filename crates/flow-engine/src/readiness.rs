//! Readiness evaluation
//!
//! Decides whether a leaf instance may fire given its pin store and which of
//! its inputs are connected.

use std::collections::HashSet;

use crate::pins::PinStore;
use crate::types::{InputMode, NodeDefinition, PinId};

/// Outcome of a readiness check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Every gating pin has a value
    Ready,
    /// Pins that still block firing
    Pending { missing: Vec<PinId> },
}

impl Readiness {
    /// Whether the instance may fire
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Whether a pin gates firing for this instance
pub fn is_gating(mode: InputMode, connected: bool) -> bool {
    match mode {
        InputMode::Required => true,
        InputMode::RequiredIfConnected => connected,
        InputMode::Optional => false,
    }
}

/// Check every gating pin of `definition` against `store`
pub fn evaluate(
    definition: &NodeDefinition,
    store: &PinStore,
    connected: &HashSet<PinId>,
) -> Readiness {
    let missing: Vec<PinId> = definition
        .inputs
        .iter()
        .filter(|pin| is_gating(pin.mode, connected.contains(&pin.id)))
        .filter(|pin| !store.has_value(&pin.id))
        .map(|pin| pin.id.clone())
        .collect();

    if missing.is_empty() {
        Readiness::Ready
    } else {
        Readiness::Pending { missing }
    }
}

/// Pins whose values a firing would take: every declared input that has one
pub fn firing_pins<'a>(definition: &'a NodeDefinition, store: &PinStore) -> Vec<&'a str> {
    definition
        .inputs
        .iter()
        .filter(|pin| store.has_value(&pin.id))
        .map(|pin| pin.id.as_str())
        .collect()
}
