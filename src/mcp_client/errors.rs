//! MCP Client error types.

use thiserror::Error;

use super::types::error_codes;

/// Errors that can occur while talking to a capability provider.
#[derive(Debug, Error)]
pub enum McpError {
    /// The provider process failed to start.
    #[error("failed to spawn provider '{name}': {reason}")]
    SpawnFailed {
        name: String,
        reason: String,
    },

    /// The initialization handshake failed.
    #[error("provider '{name}' initialization failed: {reason}")]
    InitFailed {
        name: String,
        reason: String,
    },

    /// JSON-RPC communication error (malformed message, I/O error, HTTP failure).
    #[error("transport error for provider '{server}': {reason}")]
    TransportError {
        server: String,
        reason: String,
    },

    /// Provider returned a JSON-RPC error response.
    #[error("provider error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// A provider request did not complete in time.
    #[error("'{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        operation: String,
        timeout_ms: u64,
    },

    /// No usable transport configuration (no endpoint, missing spawn target,
    /// malformed URL).
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

impl McpError {
    /// Whether the provider does not implement the requested method.
    pub fn is_method_not_found(&self) -> bool {
        matches!(
            self,
            McpError::ServerError {
                code: error_codes::METHOD_NOT_FOUND,
                ..
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_method_not_found() {
        let err = McpError::ServerError {
            code: -32601,
            message: "Method not found".into(),
            data: None,
        };
        assert!(err.is_method_not_found());

        let err = McpError::ConfigError {
            reason: "no endpoint".into(),
        };
        assert!(!err.is_method_not_found());
    }

    #[test]
    fn test_timeout_display() {
        let err = McpError::Timeout {
            operation: "tools/call".into(),
            timeout_ms: 30_000,
        };
        assert_eq!(err.to_string(), "'tools/call' timed out after 30000ms");
    }
}
