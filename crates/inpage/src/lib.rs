//! inpage - In-page agent for notebook UI test automation.
//!
//! The agent lives next to the notebook application it drives and exposes
//! a small set of wait/observe/act primitives that an out-of-page test
//! driver invokes remotely:
//!
//! - plugin lookup with activation ([`InPageAgent::get_plugin`])
//! - polling waits for predicates, delays, CSS and XPath matches
//! - cell mutation in the active notebook
//! - execution tracking for single cells ([`InPageAgent::wait_for_cell_run`])
//! - cell-by-cell runs of the whole notebook
//!
//! The host application (plugin registry, commands, shared document, DOM)
//! is reached exclusively through the traits in [`host`], injected once at
//! construction. Every wait polls on a fixed [`POLL_INTERVAL`].

use std::time::Duration;

pub mod agent;
pub mod cells;
pub mod config;
pub mod error;
pub mod execution;
pub mod host;
pub mod plugins;
pub mod protocol;
pub mod runner;
pub mod waiter;

#[cfg(feature = "bridge")]
pub mod bridge;

pub use agent::InPageAgent;
pub use config::AgentConfig;
pub use error::{AgentError, HostError};
pub use host::{CellType, Host};
pub use runner::{RunCallbacks, RunSummary};
pub use waiter::{with_deadline, WaitCondition};

/// Cadence of every polling wait.
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Default soft deadline for [`InPageAgent::wait_for_cell_run`].
pub const DEFAULT_CELL_RUN_TIMEOUT: Duration = Duration::from_millis(2000);

/// Text rendered in an output area while a widget view is still loading.
pub const WIDGET_PLACEHOLDER: &str = "Loading widget...";

/// Output nodes inside a cell node.
pub const OUTPUT_SELECTOR: &str = ".jp-Cell-outputArea .jp-OutputArea-output";

/// Body attribute carrying the name of the applied theme.
pub const THEME_ATTRIBUTE: &str = "data-jp-theme-name";
