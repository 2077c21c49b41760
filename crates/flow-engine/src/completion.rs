//! Completion tracking
//!
//! A node may declare completion outputs: groups of output pins (written as
//! `"done"` or `"a+b"`) whose emission ends the instance's lifecycle. The
//! instance completes once every pin of any single group has emitted.

use std::collections::HashSet;

use crate::types::PinId;

/// Parsed completion groups
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionPolicy {
    groups: Vec<Vec<PinId>>,
}

impl CompletionPolicy {
    /// Parse completion entries; blank pin names are ignored
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Self {
        let groups = entries
            .iter()
            .map(|entry| {
                entry
                    .as_ref()
                    .split('+')
                    .map(str::trim)
                    .filter(|pin| !pin.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|group| !group.is_empty())
            .collect();
        Self { groups }
    }

    /// The groups in declaration order
    pub fn groups(&self) -> &[Vec<PinId>] {
        &self.groups
    }

    /// All pins mentioned by any group
    pub fn pins(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().flatten().map(String::as_str)
    }

    /// Whether the policy can never be satisfied
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Per-instance record of which completion pins have emitted
#[derive(Debug, Clone)]
pub struct CompletionTracker {
    policy: CompletionPolicy,
    fired: HashSet<PinId>,
}

impl CompletionTracker {
    /// Create a tracker for a node's declared completion outputs
    pub fn new(policy: CompletionPolicy) -> Self {
        Self {
            policy,
            fired: HashSet::new(),
        }
    }

    /// Record an emission. Returns true when this emission completes the instance.
    pub fn record(&mut self, pin_id: &str) -> bool {
        if self.is_complete() || !self.policy.pins().any(|p| p == pin_id) {
            return false;
        }
        self.fired.insert(pin_id.to_string());
        self.is_complete()
    }

    /// Whether any group is fully satisfied
    pub fn is_complete(&self) -> bool {
        self.policy
            .groups()
            .iter()
            .any(|group| group.iter().all(|pin| self.fired.contains(pin)))
    }
}
