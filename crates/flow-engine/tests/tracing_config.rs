//! Integration tests for trace events, history queries, configuration
//! loading, and the cascade depth guard.

use std::cell::Cell;
use std::io::Write;
use std::rc::Rc;

use flow_engine::events::TraceError;
use flow_engine::{
    CompositeBuilder, EngineConfig, EngineError, ExecuteOptions, InputPin, InstancePath,
    Lifecycle, NodeRegistry, OutputPin, PinConfig, PinType, RunStatus, TraceEvent,
    TraceEventKind, TraceSink, VecTraceSink, ERROR_PIN,
};
use serde_json::json;
use tempfile::NamedTempFile;

mod common;

use common::{add, registry, Harness};

fn start_add(options: ExecuteOptions) -> Harness {
    Harness::start(
        add(Rc::new(Cell::new(0))),
        &["n1", "n2"],
        &["r"],
        NodeRegistry::new(),
        options,
    )
}

#[test]
fn firing_produces_ordered_trace_events() {
    let sink = Rc::new(VecTraceSink::new());
    let h = start_add(
        ExecuteOptions::new()
            .with_execution_id("traced")
            .with_trace_sink(Rc::clone(&sink) as Rc<dyn TraceSink>),
    );
    h.push("n1", json!(1));
    h.push("n2", json!(2));

    let events = sink.events();
    let kinds: Vec<(Option<&str>, &TraceEventKind)> = events
        .iter()
        .map(|event| (event.pin_id.as_deref(), &event.kind))
        .collect();
    assert_eq!(
        kinds,
        vec![
            (Some("n1"), &TraceEventKind::InputReceived { value: json!(1) }),
            (Some("n1"), &TraceEventKind::QueueChanged { count: 1 }),
            (Some("n2"), &TraceEventKind::InputReceived { value: json!(2) }),
            (Some("n2"), &TraceEventKind::QueueChanged { count: 1 }),
            (Some("n1"), &TraceEventKind::QueueChanged { count: 0 }),
            (Some("n2"), &TraceEventKind::QueueChanged { count: 0 }),
            (None, &TraceEventKind::Fired),
            (Some("r"), &TraceEventKind::OutputEmitted { value: json!(3) }),
        ]
    );
    assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
    assert!(events.iter().all(|e| e.execution_id == "traced"));
    assert_eq!(events[7].pin_type, Some(PinType::Output));
}

#[test]
fn trace_event_serializes_flat() {
    let sink = Rc::new(VecTraceSink::new());
    let h = start_add(ExecuteOptions::new().with_trace_sink(Rc::clone(&sink) as Rc<dyn TraceSink>));
    h.push("n1", json!(5));

    let value = serde_json::to_value(&sink.events()[0]).unwrap();
    assert_eq!(value["type"], "inputReceived");
    assert_eq!(value["value"], 5);
    assert_eq!(value["instanceId"], "__root");
    assert_eq!(value["pinType"], "input");

    let restored: TraceEvent = serde_json::from_value(value).unwrap();
    assert_eq!(restored, sink.events()[0]);
}

struct ClosedSink;

impl TraceSink for ClosedSink {
    fn send(&self, _event: &TraceEvent) -> Result<(), TraceError> {
        Err(TraceError::channel_closed())
    }
}

#[test]
fn failing_trace_sink_does_not_affect_execution() {
    let h = start_add(ExecuteOptions::new().with_trace_sink(Rc::new(ClosedSink)));
    h.push("n1", json!(1));
    h.push("n2", json!(2));
    assert_eq!(h.received("r"), vec![json!(3)]);
}

#[test]
fn history_is_bounded_per_pin() {
    let h = start_add(ExecuteOptions::new().with_config(EngineConfig::default().with_history_limit(2)));
    for n in 0..5 {
        h.push("n1", json!(n));
        h.push("n2", json!(n));
    }

    let page = h.handle.history("__root", Some("n1"), None, 10);
    assert_eq!(page.total, 2);

    let page = h.handle.history("__root", Some("r"), Some(PinType::Output), 1);
    assert_eq!(page.total, 2);
    assert_eq!(page.last_samples.len(), 1);
    assert_eq!(
        page.last_samples[0].kind,
        TraceEventKind::OutputEmitted { value: json!(8) }
    );

    let page = h.handle.history("__root", Some("r"), Some(PinType::Input), 10);
    assert_eq!(page.total, 0);
    assert_eq!(h.handle.history("__root.nope", None, None, 10).total, 0);
}

#[test]
fn config_file_drives_the_run() {
    let mut file = NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"historyLimit": 1, "maxCascadeDepth": 64, "defaultPinConfig": "sticky"}}"#
    )
    .unwrap();

    let config = EngineConfig::from_file(file.path()).unwrap();
    assert_eq!(config.history_limit, 1);
    assert_eq!(config.max_cascade_depth, 64);
    assert_eq!(config.default_pin_config, PinConfig::Sticky);

    let h = start_add(ExecuteOptions::new().with_config(config));
    h.push("n2", json!(10));
    h.push("n1", json!(1));
    h.push("n1", json!(2));
    assert_eq!(h.received("r"), vec![json!(11), json!(12)]);
    assert_eq!(h.handle.history("__root", Some("n1"), None, 10).total, 1);
}

#[test]
fn bad_config_files_are_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, r#"{{"maxCascadeDepth": 0}}"#).unwrap();
    assert!(matches!(
        EngineConfig::from_file(file.path()),
        Err(EngineError::InvalidConfig(_))
    ));

    let mut file = NamedTempFile::new().unwrap();
    write!(file, "not json").unwrap();
    assert!(matches!(
        EngineConfig::from_file(file.path()),
        Err(EngineError::Serialization(_))
    ));

    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        EngineConfig::from_file(dir.path().join("missing.json")),
        Err(EngineError::Io(_))
    ));
}

#[test]
fn invalid_config_fails_to_start() {
    let err = Harness::try_start(
        add(Rc::new(Cell::new(0))),
        &[],
        &[],
        NodeRegistry::new(),
        ExecuteOptions::new().with_config(EngineConfig::default().with_max_cascade_depth(0)),
    )
    .err()
    .unwrap();
    assert!(matches!(err, EngineError::InvalidConfig(_)));
}

fn echo_loop() -> CompositeBuilder {
    CompositeBuilder::new("EchoLoop")
        .add_input(InputPin::required("start"))
        .add_instance("echo", "Passthrough", (0.0, 0.0))
        .connect("echo", "out", "echo", "value")
        .expose_input("start", "echo", "value")
}

#[test]
fn runaway_cascade_fails_the_receiving_instance() {
    let h = Harness::start(
        echo_loop().build(),
        &["start"],
        &[],
        registry(),
        ExecuteOptions::new().with_config(EngineConfig::default().with_max_cascade_depth(16)),
    );
    h.push("start", json!(1));

    match h.handle.status() {
        RunStatus::Failed(error) => {
            assert!(error.message.contains("Cascade depth limit of 16"));
            assert_eq!(error.origin.as_deref(), Some("__root.echo"));
        }
        other => panic!("unexpected status {:?}", other),
    }
}

#[test]
fn caught_cascade_failure_leaves_the_run_going() {
    let definition = echo_loop()
        .add_output(OutputPin::new("out"))
        .expose_output("out", "echo", "out")
        .build();
    let h = Harness::start(
        definition,
        &["start"],
        &["out", ERROR_PIN],
        registry(),
        ExecuteOptions::new().with_config(EngineConfig::default().with_max_cascade_depth(8)),
    );
    h.push("start", json!("ping"));

    assert_eq!(h.received(ERROR_PIN).len(), 1);
    assert!(!h.received("out").is_empty());
    assert_eq!(h.handle.status(), RunStatus::Running);
    assert_eq!(
        h.handle.lifecycle(&InstancePath::root().child("echo")),
        Some(Lifecycle::Failed)
    );
}
