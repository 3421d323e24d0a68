//! Error types for the agent and the host seams it calls through.

use std::time::Duration;

/// Failure reported by the host application.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HostError {
    #[error("Command {command} failed: {message}")]
    Command { command: String, message: String },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Plugin activation failed for {id}: {message}")]
    Activation { id: String, message: String },

    #[error("Scroll to item {index} failed: {message}")]
    Scroll { index: usize, message: String },

    #[error("Document edit failed: {0}")]
    Document(String),

    #[error("Cell index {0} out of range")]
    IndexOutOfRange(usize),

    #[error("Invalid query {query:?}: {reason}")]
    InvalidQuery { query: String, reason: String },
}

/// Error type for agent operations.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Timed out after {0:?} waiting for condition to be fulfilled")]
    Timeout(Duration),

    #[error("Predicate failed: {0:#}")]
    Predicate(anyhow::Error),

    #[error("Callback failed: {0:#}")]
    Callback(anyhow::Error),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error("Failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
