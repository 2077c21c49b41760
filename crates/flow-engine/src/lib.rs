//! Flow Engine - reactive dataflow execution for node graphs
//!
//! This crate runs node graphs as long-lived reactive processes. A node is
//! either a leaf backed by code or a composite defined by a sub-graph of
//! other nodes. Values pushed into a run's input streams flow synchronously
//! through the graph:
//!
//! - Input pins buffer values as FIFO queues or sticky latest-value slots
//! - A node fires once every gating input holds a value; reactive inputs
//!   re-fire it inside an open cycle
//! - Errors travel on the reserved `__error` pin and bubble to the nearest
//!   enclosing composite that catches them
//! - Completion groups end an instance's lifecycle and run its cleanups
//! - Every arrival, firing, emission and error is traced
//!
//! # Architecture
//!
//! - `engine`: the run arena, cascade, error and termination handling
//! - `wiring`: recursive instantiation of composites into routes
//! - `pins` / `readiness` / `completion`: per-instance bookkeeping
//! - `events`: trace events, sinks and the per-pin history buffer
//!
//! # Example
//!
//! ```ignore
//! use flow_engine::{execute, ExecuteOptions, InputPin, NodeDefinition, NodeRegistry, OutputPin};
//!
//! let add = NodeDefinition::code("Add", |inputs, outputs, _| {
//!     let a = inputs.require("n1")?.as_i64().unwrap_or_default();
//!     let b = inputs.require("n2")?.as_i64().unwrap_or_default();
//!     outputs.emit("r", serde_json::json!(a + b));
//!     Ok(())
//! })
//! .with_input(InputPin::required("n1"))
//! .with_input(InputPin::required("n2"))
//! .with_output(OutputPin::new("r"));
//!
//! let handle = execute(Rc::new(add), inputs, outputs, NodeRegistry::new(), ExecuteOptions::new())?;
//! ```

pub mod builder;
pub mod completion;
pub mod composite;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod pins;
pub mod readiness;
pub mod registry;
pub mod side_channel;
pub mod stream;
pub mod types;
pub mod validation;
mod wiring;

// Re-export key types
pub use builder::CompositeBuilder;
pub use composite::{CompositeGraph, PortMapping};
pub use config::EngineConfig;
pub use context::{ExecutionContext, NodeInputs, NodeOutputs, OutputSink, StateStore};
pub use engine::{execute, ExecuteOptions, ExecutionHandle, Lifecycle, RunStatus};
pub use error::{EngineError, NodeError, Result};
pub use events::{HistoryPage, NullTraceSink, TraceEvent, TraceEventKind, TraceSink, VecTraceSink};
pub use registry::NodeRegistry;
pub use side_channel::SideChannelRegistry;
pub use stream::{PinStream, ValueStream};
pub use types::{
    Connection, InputMode, InputPin, InstancePath, NodeDefinition, NodeExecutor, NodeInstance,
    OutputPin, PinConfig, PinType, ERROR_PIN, ROOT_INSTANCE_ID,
};
pub use validation::ValidationError;
