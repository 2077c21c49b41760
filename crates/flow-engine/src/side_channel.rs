//! Namespaced publish/subscribe between instances
//!
//! Keys are always scoped by a namespace derived from the execution id and
//! the ancestor path of the instance that publishes or subscribes, so two
//! runs sharing a registry, or two instantiations of the same composite,
//! never see each other's messages.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use serde_json::Value;

use crate::stream::ValueHandler;

/// Fully scoped channel name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey {
    /// Execution id and ancestor path
    pub namespace: String,
    /// User-chosen key
    pub key: String,
}

impl ChannelKey {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
        }
    }
}

/// Token returned by `subscribe`, needed to unsubscribe
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelSubscription {
    channel: ChannelKey,
    id: u64,
}

/// Registry of channel subscribers
#[derive(Default)]
pub struct SideChannelRegistry {
    channels: RefCell<HashMap<ChannelKey, Vec<(u64, ValueHandler)>>>,
    next_id: Cell<u64>,
}

impl SideChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a value to every subscriber of the channel.
    ///
    /// Returns the number of handlers called.
    pub fn publish(&self, channel: &ChannelKey, value: &Value) -> usize {
        let handlers: Vec<ValueHandler> = self
            .channels
            .borrow()
            .get(channel)
            .map(|subs| subs.iter().map(|(_, h)| Rc::clone(h)).collect())
            .unwrap_or_default();
        log::debug!(
            "side channel '{}' in '{}': {} subscriber(s)",
            channel.key,
            channel.namespace,
            handlers.len()
        );
        for handler in &handlers {
            handler(value);
        }
        handlers.len()
    }

    /// Register a handler on a channel
    pub fn subscribe(&self, channel: ChannelKey, handler: ValueHandler) -> ChannelSubscription {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.channels
            .borrow_mut()
            .entry(channel.clone())
            .or_default()
            .push((id, handler));
        ChannelSubscription { channel, id }
    }

    /// Remove a handler. Returns false if it was already gone.
    pub fn unsubscribe(&self, subscription: &ChannelSubscription) -> bool {
        let mut channels = self.channels.borrow_mut();
        let Some(subs) = channels.get_mut(&subscription.channel) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|(id, _)| *id != subscription.id);
        let removed = subs.len() != before;
        if subs.is_empty() {
            channels.remove(&subscription.channel);
        }
        removed
    }

    /// Number of subscribers on a channel
    pub fn subscriber_count(&self, channel: &ChannelKey) -> usize {
        self.channels.borrow().get(channel).map_or(0, Vec::len)
    }
}
