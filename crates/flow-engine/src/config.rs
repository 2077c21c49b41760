//! Engine configuration
//!
//! All fields have defaults, so an empty JSON object is a valid config.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::types::PinConfig;

/// Default values
pub mod defaults {
    /// Trace events kept per (instance, pin)
    pub const HISTORY_LIMIT: usize = 100;
    /// Nested deliveries allowed before a cascade is cut off
    pub const MAX_CASCADE_DEPTH: usize = 512;
}

/// Tunables for a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Trace events retained per (instance, pin) for history queries
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Maximum depth of synchronous value propagation
    #[serde(default = "default_max_cascade_depth")]
    pub max_cascade_depth: usize,
    /// Storage mode for input pins without an explicit override
    #[serde(default)]
    pub default_pin_config: PinConfig,
}

fn default_history_limit() -> usize {
    defaults::HISTORY_LIMIT
}

fn default_max_cascade_depth() -> usize {
    defaults::MAX_CASCADE_DEPTH
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            max_cascade_depth: default_max_cascade_depth(),
            default_pin_config: PinConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a config from JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file from disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&contents)?;
        log::info!("Loaded engine configuration from {:?}", path);
        Ok(config)
    }

    /// Set the history limit
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Set the cascade depth limit
    pub fn with_max_cascade_depth(mut self, depth: usize) -> Self {
        self.max_cascade_depth = depth;
        self
    }

    /// Set the default pin storage mode
    pub fn with_default_pin_config(mut self, config: PinConfig) -> Self {
        self.default_pin_config = config;
        self
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_cascade_depth == 0 {
            return Err(EngineError::InvalidConfig(
                "maxCascadeDepth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
