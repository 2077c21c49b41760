//! Common test utilities for integration tests.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use flow_engine::{
    execute, ExecuteOptions, ExecutionHandle, InputPin, NodeDefinition, NodeError, NodeRegistry,
    OutputPin, PinStream, ValueStream,
};
use serde_json::{json, Value};

/// Route engine logs through the test harness.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A running flow with one stream per bound pin.
pub struct Harness {
    pub handle: ExecutionHandle,
    inputs: HashMap<String, Rc<ValueStream>>,
    received: HashMap<String, Rc<RefCell<Vec<Value>>>>,
}

impl Harness {
    /// Start `definition` with streams bound to the given input and output pins.
    pub fn start(
        definition: NodeDefinition,
        inputs: &[&str],
        outputs: &[&str],
        registry: NodeRegistry,
        options: ExecuteOptions,
    ) -> Self {
        Self::try_start(definition, inputs, outputs, registry, options).unwrap()
    }

    pub fn try_start(
        definition: NodeDefinition,
        inputs: &[&str],
        outputs: &[&str],
        registry: NodeRegistry,
        options: ExecuteOptions,
    ) -> flow_engine::Result<Self> {
        init_logging();

        let input_streams: HashMap<String, Rc<ValueStream>> = inputs
            .iter()
            .map(|pin| (pin.to_string(), ValueStream::shared()))
            .collect();

        let mut received = HashMap::new();
        let mut output_streams: HashMap<String, Rc<dyn PinStream>> = HashMap::new();
        for pin in outputs {
            let stream = ValueStream::shared();
            received.insert(pin.to_string(), collect(&stream));
            output_streams.insert(pin.to_string(), stream as Rc<dyn PinStream>);
        }

        let bound: HashMap<String, Rc<dyn PinStream>> = input_streams
            .iter()
            .map(|(pin, stream)| (pin.clone(), Rc::clone(stream) as Rc<dyn PinStream>))
            .collect();

        let handle = execute(Rc::new(definition), bound, output_streams, registry, options)?;
        Ok(Self {
            handle,
            inputs: input_streams,
            received,
        })
    }

    /// Push a value into a top-level input.
    pub fn push(&self, pin: &str, value: Value) {
        self.inputs[pin].push(value);
    }

    /// Input stream bound to `pin`.
    pub fn input(&self, pin: &str) -> Rc<ValueStream> {
        Rc::clone(&self.inputs[pin])
    }

    /// Everything observed on an output so far.
    pub fn received(&self, pin: &str) -> Vec<Value> {
        self.received[pin].borrow().clone()
    }
}

/// Record every value pushed into `stream`.
pub fn collect(stream: &Rc<ValueStream>) -> Rc<RefCell<Vec<Value>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&seen);
    stream.subscribe(Rc::new(move |v: &Value| s.borrow_mut().push(v.clone())));
    seen
}

fn int(value: Option<&Value>) -> i64 {
    value.and_then(Value::as_i64).unwrap_or_default()
}

/// `r = n1 + n2`, counting its firings.
pub fn add(calls: Rc<Cell<usize>>) -> NodeDefinition {
    NodeDefinition::code("Add", move |inputs, outputs, _| {
        calls.set(calls.get() + 1);
        let sum = int(inputs.get("n1")) + int(inputs.get("n2"));
        outputs.emit("r", json!(sum));
        Ok(())
    })
    .with_namespace("Math")
    .with_input(InputPin::required("n1"))
    .with_input(InputPin::required("n2"))
    .with_output(OutputPin::new("r"))
}

/// `r = n / d`, failing on a zero divisor.
pub fn divide() -> NodeDefinition {
    NodeDefinition::code("Divide", |inputs, outputs, _| {
        let d = int(inputs.get("d"));
        if d == 0 {
            return Err(NodeError::new("division by zero"));
        }
        outputs.emit("r", json!(int(inputs.get("n")) / d));
        Ok(())
    })
    .with_namespace("Math")
    .with_input(InputPin::required("n"))
    .with_input(InputPin::required("d"))
    .with_output(OutputPin::new("r"))
}

/// Turns a caught error into its message.
pub fn describe() -> NodeDefinition {
    NodeDefinition::code("Describe", |inputs, outputs, _| {
        let error = inputs.require("error")?;
        outputs.emit("message", error["message"].clone());
        outputs.emit("origin", error["origin"].clone());
        Ok(())
    })
    .with_input(InputPin::required("error"))
    .with_output(OutputPin::new("message"))
    .with_output(OutputPin::new("origin"))
}

/// Forwards its input unchanged.
pub fn passthrough() -> NodeDefinition {
    NodeDefinition::code("Passthrough", |inputs, outputs, _| {
        outputs.emit("out", inputs.require("value")?.clone());
        Ok(())
    })
    .with_input(InputPin::required("value"))
    .with_output(OutputPin::new("out"))
}

/// A registry holding every node above.
pub fn registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.register(add(Rc::new(Cell::new(0))));
    registry.register(divide());
    registry.register(describe());
    registry.register(passthrough());
    registry
}
