//! Boundary streams for feeding and observing a run
//!
//! The engine only needs two capabilities from the values it is given at the
//! top level: push a value and subscribe to values. [`ValueStream`] is the
//! in-process implementation; callers may provide their own.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::Value;

/// Handle returned by `subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Callback invoked for every pushed value
pub type ValueHandler = Rc<dyn Fn(&Value)>;

/// Minimal push/subscribe capability
pub trait PinStream {
    /// Deliver a value to every current subscriber, synchronously
    fn push(&self, value: Value);

    /// Register a handler
    fn subscribe(&self, handler: ValueHandler) -> SubscriptionId;

    /// Remove a handler; unknown ids are ignored
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Synchronous multicast stream
#[derive(Default)]
pub struct ValueStream {
    subscribers: RefCell<Vec<(SubscriptionId, ValueHandler)>>,
    next_id: Cell<u64>,
}

impl ValueStream {
    /// Create a stream with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a shared stream, ready to hand to `execute`
    pub fn shared() -> Rc<Self> {
        Rc::new(Self::new())
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }
}

impl PinStream for ValueStream {
    fn push(&self, value: Value) {
        // Handlers may subscribe or unsubscribe while being called
        let handlers: Vec<ValueHandler> = self
            .subscribers
            .borrow()
            .iter()
            .map(|(_, handler)| Rc::clone(handler))
            .collect();
        for handler in handlers {
            handler(&value);
        }
    }

    fn subscribe(&self, handler: ValueHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);
        self.subscribers.borrow_mut().push((id, handler));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.borrow_mut().retain(|(sub, _)| *sub != id);
    }
}

impl std::fmt::Debug for ValueStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueStream")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
