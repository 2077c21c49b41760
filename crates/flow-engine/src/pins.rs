//! Per-instance input pin storage
//!
//! Each input pin of a leaf instance holds its arrivals either as a FIFO
//! queue (consumed one value per firing) or as a sticky slot (latest value,
//! reused by every firing).

use std::collections::{HashMap, VecDeque};

use serde_json::Value;

use crate::types::{InputPin, PinConfig, PinId};

/// Runtime state of one input pin
#[derive(Debug, Clone, PartialEq)]
pub enum PinState {
    /// Buffered arrivals, oldest first
    Queue(VecDeque<Value>),
    /// Latest arrival, if any arrived yet
    Sticky(Option<Value>),
}

impl PinState {
    fn new(config: PinConfig) -> Self {
        match config {
            PinConfig::Queue => Self::Queue(VecDeque::new()),
            PinConfig::Sticky => Self::Sticky(None),
        }
    }

    /// Whether a firing could use a value from this pin right now
    pub fn has_value(&self) -> bool {
        match self {
            Self::Queue(queue) => !queue.is_empty(),
            Self::Sticky(slot) => slot.is_some(),
        }
    }

    /// The storage mode of this pin
    pub fn config(&self) -> PinConfig {
        match self {
            Self::Queue(_) => PinConfig::Queue,
            Self::Sticky(_) => PinConfig::Sticky,
        }
    }
}

/// Input pin states for one instance
#[derive(Debug, Clone, Default)]
pub struct PinStore {
    pins: HashMap<PinId, PinState>,
}

impl PinStore {
    /// Allocate state for every declared input.
    ///
    /// `overrides` wins over `default_config` for the pins it names.
    pub fn new(
        inputs: &[InputPin],
        overrides: &HashMap<PinId, PinConfig>,
        default_config: PinConfig,
    ) -> Self {
        let pins = inputs
            .iter()
            .map(|pin| {
                let config = overrides.get(&pin.id).copied().unwrap_or(default_config);
                (pin.id.clone(), PinState::new(config))
            })
            .collect();
        Self { pins }
    }

    /// Record an arrival. Returns false if the pin is not declared.
    pub fn push(&mut self, pin_id: &str, value: Value) -> bool {
        match self.pins.get_mut(pin_id) {
            Some(PinState::Queue(queue)) => {
                queue.push_back(value);
                true
            }
            Some(PinState::Sticky(slot)) => {
                *slot = Some(value);
                true
            }
            None => false,
        }
    }

    /// Whether the pin currently has a usable value
    pub fn has_value(&self, pin_id: &str) -> bool {
        self.pins.get(pin_id).is_some_and(PinState::has_value)
    }

    /// Availability of every pin
    pub fn peek_ready(&self) -> HashMap<PinId, bool> {
        self.pins
            .iter()
            .map(|(id, state)| (id.clone(), state.has_value()))
            .collect()
    }

    /// Take one firing's worth of values from the given pins.
    ///
    /// Queue pins lose their front value; sticky pins are cloned and keep
    /// theirs. Pins without a value are skipped.
    pub fn consume<'a, I>(&mut self, pin_ids: I) -> HashMap<PinId, Value>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut taken = HashMap::new();
        for pin_id in pin_ids {
            let value = match self.pins.get_mut(pin_id) {
                Some(PinState::Queue(queue)) => queue.pop_front(),
                Some(PinState::Sticky(slot)) => slot.clone(),
                None => None,
            };
            if let Some(value) = value {
                taken.insert(pin_id.to_string(), value);
            }
        }
        taken
    }

    /// Number of values waiting on a pin (a populated sticky slot counts as one)
    pub fn queued_count(&self, pin_id: &str) -> usize {
        match self.pins.get(pin_id) {
            Some(PinState::Queue(queue)) => queue.len(),
            Some(PinState::Sticky(slot)) => usize::from(slot.is_some()),
            None => 0,
        }
    }

    /// Waiting counts for every pin
    pub fn queued_counts(&self) -> HashMap<PinId, usize> {
        self.pins
            .keys()
            .map(|id| (id.clone(), self.queued_count(id)))
            .collect()
    }

    /// Whether any queue pin among `pin_ids` holds a buffered value
    pub fn has_buffered<'a, I>(&self, pin_ids: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        pin_ids
            .into_iter()
            .any(|id| matches!(self.pins.get(id), Some(PinState::Queue(q)) if !q.is_empty()))
    }

    /// Drop all but the newest value of a queue pin.
    ///
    /// Returns how many values were dropped; sticky pins are untouched.
    pub fn keep_newest(&mut self, pin_id: &str) -> usize {
        match self.pins.get_mut(pin_id) {
            Some(PinState::Queue(queue)) if queue.len() > 1 => {
                let dropped = queue.len() - 1;
                queue.drain(..dropped);
                dropped
            }
            _ => 0,
        }
    }

    /// The value held by a sticky pin
    pub fn latest(&self, pin_id: &str) -> Option<&Value> {
        match self.pins.get(pin_id) {
            Some(PinState::Sticky(slot)) => slot.as_ref(),
            _ => None,
        }
    }

    /// Storage mode of a pin
    pub fn config(&self, pin_id: &str) -> Option<PinConfig> {
        self.pins.get(pin_id).map(PinState::config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(sticky: &[&str]) -> PinStore {
        let inputs = vec![InputPin::required("n1"), InputPin::required("n2")];
        let overrides = sticky
            .iter()
            .map(|id| (id.to_string(), PinConfig::Sticky))
            .collect();
        PinStore::new(&inputs, &overrides, PinConfig::Queue)
    }

    #[test]
    fn test_queue_is_fifo_and_drains() {
        let mut pins = store(&[]);
        assert!(pins.push("n1", json!(1)));
        assert!(pins.push("n1", json!(2)));
        assert_eq!(pins.queued_count("n1"), 2);

        let first = pins.consume(["n1"]);
        assert_eq!(first["n1"], json!(1));
        let second = pins.consume(["n1"]);
        assert_eq!(second["n1"], json!(2));
        assert!(!pins.has_value("n1"));
        assert!(pins.consume(["n1"]).is_empty());
    }

    #[test]
    fn test_sticky_keeps_latest_value() {
        let mut pins = store(&["n2"]);
        pins.push("n2", json!("a"));
        pins.push("n2", json!("b"));
        assert_eq!(pins.latest("n2"), Some(&json!("b")));

        for _ in 0..3 {
            assert_eq!(pins.consume(["n2"])["n2"], json!("b"));
        }
        assert!(pins.has_value("n2"));
        assert_eq!(pins.queued_count("n2"), 1);
    }

    #[test]
    fn test_peek_ready_reports_every_pin() {
        let mut pins = store(&["n2"]);
        pins.push("n1", json!(1));
        let ready = pins.peek_ready();
        assert_eq!(ready.get("n1"), Some(&true));
        assert_eq!(ready.get("n2"), Some(&false));
    }

    #[test]
    fn test_unknown_pin_is_rejected() {
        let mut pins = store(&[]);
        assert!(!pins.push("nope", json!(1)));
        assert_eq!(pins.config("nope"), None);
        assert_eq!(pins.config("n1"), Some(PinConfig::Queue));
    }

    #[test]
    fn test_keep_newest_trims_queue_only() {
        let mut pins = store(&["n2"]);
        for n in 1..=3 {
            pins.push("n1", json!(n));
        }
        pins.push("n2", json!(true));

        assert_eq!(pins.keep_newest("n1"), 2);
        assert_eq!(pins.keep_newest("n1"), 0);
        assert_eq!(pins.keep_newest("n2"), 0);
        assert_eq!(pins.consume(["n1"]).remove("n1"), Some(json!(3)));
        assert_eq!(pins.queued_count("n2"), 1);
    }

    #[test]
    fn test_has_buffered_ignores_sticky() {
        let mut pins = store(&["n2"]);
        pins.push("n2", json!(1));
        assert!(!pins.has_buffered(["n1", "n2"]));
        pins.push("n1", json!(1));
        assert!(pins.has_buffered(["n1", "n2"]));
    }
}
