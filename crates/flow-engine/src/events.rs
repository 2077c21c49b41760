//! Trace events for observing flow execution
//!
//! Events are sent from the engine to a debugger or editor (or any other
//! consumer) to report pin arrivals, firings, emissions, and errors. They are
//! read-only instrumentation: a failing sink never changes what the engine
//! does.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{InstanceId, InstancePath, PinId, PinType};

/// Trait for receiving trace events
///
/// This abstracts over the transport (debugger socket, channel, log file),
/// allowing the engine to be used in different contexts.
pub trait TraceSink {
    /// Send an event
    ///
    /// Returns an error if the event could not be delivered (e.g., channel closed)
    fn send(&self, event: &TraceEvent) -> Result<(), TraceError>;
}

/// Error when delivering an event fails
#[derive(Debug, Clone, Error)]
#[error("Trace error: {message}")]
pub struct TraceError {
    pub message: String,
}

impl TraceError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// What happened at a pin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TraceEventKind {
    /// A value arrived at an input pin
    InputReceived { value: Value },
    /// The number of values waiting on an input pin changed
    QueueChanged { count: usize },
    /// The instance started a firing
    Fired,
    /// A value left an output pin
    OutputEmitted { value: Value },
    /// An error was raised or bubbled onto the error pin
    Error { error: Value },
    /// The instance reached the end of its lifecycle without error
    Completed,
    /// A cleanup callback failed
    CleanupFailed { error: Value },
}

/// A single trace record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEvent {
    /// Monotonic sequence number within the run
    pub seq: u64,
    /// Run this event belongs to
    pub execution_id: String,
    /// Enclosing instance ids, outermost first
    pub ancestors: Vec<InstanceId>,
    /// Local id of the instance
    pub instance_id: InstanceId,
    /// Pin the event concerns, if any
    pub pin_id: Option<PinId>,
    /// Direction of that pin
    pub pin_type: Option<PinType>,
    /// What happened
    #[serde(flatten)]
    pub kind: TraceEventKind,
    /// When it happened
    pub timestamp: DateTime<Utc>,
}

impl TraceEvent {
    /// Namespaced id of the instance (`__root.outer.add`)
    pub fn instance_path(&self) -> String {
        let mut segments = self.ancestors.clone();
        segments.push(self.instance_id.clone());
        segments.join(".")
    }
}

/// A sink that discards all events
pub struct NullTraceSink;

impl TraceSink for NullTraceSink {
    fn send(&self, _event: &TraceEvent) -> Result<(), TraceError> {
        Ok(())
    }
}

/// A vector-based sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
#[derive(Default)]
pub struct VecTraceSink {
    events: RefCell<Vec<TraceEvent>>,
}

impl VecTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.borrow().clone()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }
}

impl TraceSink for VecTraceSink {
    fn send(&self, event: &TraceEvent) -> Result<(), TraceError> {
        self.events.borrow_mut().push(event.clone());
        Ok(())
    }
}

/// Answer to a history query
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    /// Matching events still retained
    pub total: usize,
    /// Most recent matching events, oldest first
    pub last_samples: Vec<TraceEvent>,
}

/// Bounded recent-event buffer, one ring per (instance, pin)
#[derive(Debug)]
pub struct HistoryBuffer {
    limit: usize,
    entries: HashMap<String, HashMap<Option<PinId>, VecDeque<TraceEvent>>>,
}

impl HistoryBuffer {
    /// Keep at most `limit` events per pin
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            entries: HashMap::new(),
        }
    }

    pub fn record(&mut self, event: TraceEvent) {
        if self.limit == 0 {
            return;
        }
        let ring = self
            .entries
            .entry(event.instance_path())
            .or_default()
            .entry(event.pin_id.clone())
            .or_default();
        if ring.len() == self.limit {
            ring.pop_front();
        }
        ring.push_back(event);
    }

    /// The most recent `limit` events for an instance, optionally narrowed
    /// to one pin and pin direction
    pub fn query(
        &self,
        instance: &str,
        pin_id: Option<&str>,
        pin_type: Option<PinType>,
        limit: usize,
    ) -> HistoryPage {
        let Some(pins) = self.entries.get(instance) else {
            return HistoryPage::default();
        };
        let mut matching: Vec<&TraceEvent> = pins
            .iter()
            .filter(|(pin, _)| pin_id.is_none() || pin.as_deref() == pin_id)
            .flat_map(|(_, ring)| ring.iter())
            .filter(|event| pin_type.is_none() || event.pin_type == pin_type)
            .collect();
        matching.sort_by_key(|event| event.seq);

        let total = matching.len();
        let skip = total.saturating_sub(limit);
        HistoryPage {
            total,
            last_samples: matching.into_iter().skip(skip).cloned().collect(),
        }
    }
}

/// Emits events to the sink and the history buffer
pub(crate) struct Tracer {
    execution_id: String,
    sink: Option<Rc<dyn TraceSink>>,
    history: RefCell<HistoryBuffer>,
    seq: Cell<u64>,
}

impl Tracer {
    pub(crate) fn new(
        execution_id: impl Into<String>,
        sink: Option<Rc<dyn TraceSink>>,
        history_limit: usize,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            sink,
            history: RefCell::new(HistoryBuffer::new(history_limit)),
            seq: Cell::new(0),
        }
    }

    pub(crate) fn emit(
        &self,
        path: &InstancePath,
        pin: Option<(&str, PinType)>,
        kind: TraceEventKind,
    ) {
        let seq = self.seq.get();
        self.seq.set(seq + 1);
        let event = TraceEvent {
            seq,
            execution_id: self.execution_id.clone(),
            ancestors: path.ancestors().to_vec(),
            instance_id: path.instance_id().to_string(),
            pin_id: pin.map(|(id, _)| id.to_string()),
            pin_type: pin.map(|(_, ty)| ty),
            kind,
            timestamp: Utc::now(),
        };

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.send(&event) {
                log::warn!("Dropping trace event {} for '{}': {}", seq, path, e);
            }
        }
        self.history.borrow_mut().record(event);
    }

    pub(crate) fn history(
        &self,
        instance: &str,
        pin_id: Option<&str>,
        pin_type: Option<PinType>,
        limit: usize,
    ) -> HistoryPage {
        self.history.borrow().query(instance, pin_id, pin_type, limit)
    }
}
