//! Error types for the flow engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::validation::ValidationError;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that prevent a run from starting or a config from loading.
///
/// Failures raised by node computations are not `EngineError`s; they travel
/// through the graph as [`NodeError`] values.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A graph references something that does not exist
    #[error("Wiring error in '{scope}': {}", first_error(.errors))]
    Wiring {
        scope: String,
        errors: Vec<ValidationError>,
    },

    /// A boundary stream was bound to a pin the root node does not declare
    #[error("Root node '{node_id}' has no {direction} pin '{pin_id}'")]
    UnknownBoundaryPin {
        node_id: String,
        pin_id: String,
        direction: &'static str,
    },

    /// Configuration value out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn first_error(errors: &[ValidationError]) -> String {
    match errors {
        [] => "unknown".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{} (and {} more)", first, rest.len()),
    }
}

impl EngineError {
    /// Create a wiring error for a single validation failure
    pub fn wiring(scope: impl Into<String>, error: ValidationError) -> Self {
        Self::Wiring {
            scope: scope.into(),
            errors: vec![error],
        }
    }
}

/// A failure reported by a node computation.
///
/// Emitted on the reserved error pin as a JSON object so that a catching
/// instance receives it like any other value.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{message}")]
pub struct NodeError {
    /// Human-readable failure description
    pub message: String,
    /// Namespaced id of the instance that raised the error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    /// Optional structured payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl NodeError {
    /// Create an error with a message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            origin: None,
            data: None,
        }
    }

    /// Attach a structured payload
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Set the origin unless one is already recorded
    pub(crate) fn originating_at(mut self, origin: &str) -> Self {
        if self.origin.is_none() {
            self.origin = Some(origin.to_string());
        }
        self
    }

    /// The value delivered on an error pin
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::json!({ "message": self.message }))
    }
}

impl From<String> for NodeError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for NodeError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}
