//! Engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::defaults;
use crate::error::{ActivationError, Result};

/// Configuration for the activation engine
///
/// Every field has a default, so partial JSON documents are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Port name treated as a trigger input when the kind catalog does not
    /// declare a role for it
    pub trigger_port: String,
    /// Port names treated as metadata inputs when the kind catalog does not
    /// declare a role for them
    pub metadata_ports: Vec<String>,
    /// Tick length for the frame driver, in milliseconds
    pub frame_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            trigger_port: defaults::TRIGGER_PORT.to_string(),
            metadata_ports: defaults::METADATA_PORTS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            frame_interval_ms: defaults::FRAME_INTERVAL_MS,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that the settings are usable
    pub fn validate(&self) -> Result<()> {
        if self.trigger_port.is_empty() {
            return Err(ActivationError::Config(
                "triggerPort must not be empty".to_string(),
            ));
        }
        if self.frame_interval_ms == 0 {
            return Err(ActivationError::Config(
                "frameIntervalMs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Tick length as a duration
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    /// Whether a port name is a configured metadata port
    pub fn is_metadata_port(&self, port: &str) -> bool {
        self.metadata_ports.iter().any(|p| p == port)
    }
}
