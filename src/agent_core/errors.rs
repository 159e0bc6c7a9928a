//! Agent Core error types.

use thiserror::Error;

use crate::inference::InferenceError;
use crate::mcp_client::McpError;

/// Errors that abort a user turn.
///
/// Tool execution failures are not here; they become model-facing text
/// (see [`super::tool_router::ToolOutcome`]).
#[derive(Debug, Error)]
pub enum AgentError {
    /// Missing credentials, unusable provider transport, bad config.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    /// The provider could not be spawned, reached, or initialized.
    #[error("connection error: {reason}")]
    Connection { reason: String },

    /// The language-model backend failed.
    #[error("backend error: {reason}")]
    Backend { reason: String },

    /// A backend or provider call did not finish in time.
    #[error("timed out: {reason}")]
    Timeout { reason: String },

    /// The inbound request was rejected before any work happened.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// A turn would break the history's shape (e.g. a second system turn).
    #[error("invalid turn: {reason}")]
    InvalidTurn { reason: String },
}

impl AgentError {
    /// Stable name of the error kind, as reported to clients.
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::Configuration { .. } => "ConfigurationError",
            AgentError::Connection { .. } => "ConnectionError",
            AgentError::Backend { .. } => "BackendError",
            AgentError::Timeout { .. } => "TimeoutError",
            AgentError::InvalidRequest { .. } => "InvalidRequest",
            AgentError::InvalidTurn { .. } => "InvalidTurn",
        }
    }
}

impl From<McpError> for AgentError {
    fn from(e: McpError) -> Self {
        match e {
            McpError::ConfigError { .. } => AgentError::Configuration {
                reason: e.to_string(),
            },
            McpError::Timeout { .. } => AgentError::Timeout {
                reason: e.to_string(),
            },
            _ => AgentError::Connection {
                reason: e.to_string(),
            },
        }
    }
}

impl From<InferenceError> for AgentError {
    fn from(e: InferenceError) -> Self {
        match e {
            InferenceError::Timeout { .. } => AgentError::Timeout {
                reason: e.to_string(),
            },
            InferenceError::ConfigError { .. } => AgentError::Configuration {
                reason: e.to_string(),
            },
            _ => AgentError::Backend {
                reason: e.to_string(),
            },
        }
    }
}
