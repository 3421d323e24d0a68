//! Agent configuration.
//!
//! Every field has a default matching the notebook UI the agent was built
//! against, so an empty JSON object is a valid config file.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{DEFAULT_CELL_RUN_TIMEOUT, OUTPUT_SELECTOR, THEME_ATTRIBUTE, WIDGET_PLACEHOLDER};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Soft deadline for a single cell run, in milliseconds.
    pub cell_run_timeout_ms: u64,

    /// Output text that marks a widget still being attached.
    pub widget_placeholder: String,

    /// Selector of output nodes, relative to a cell node.
    pub output_selector: String,

    /// Body attribute holding the current theme name.
    pub theme_attribute: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            cell_run_timeout_ms: DEFAULT_CELL_RUN_TIMEOUT.as_millis() as u64,
            widget_placeholder: WIDGET_PLACEHOLDER.to_string(),
            output_selector: OUTPUT_SELECTOR.to_string(),
            theme_attribute: THEME_ATTRIBUTE.to_string(),
        }
    }
}

impl AgentConfig {
    pub fn cell_run_timeout(&self) -> Duration {
        Duration::from_millis(self.cell_run_timeout_ms)
    }

    /// Load from a JSON file. Missing keys fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read agent config {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid agent config {:?}", path))
    }
}
