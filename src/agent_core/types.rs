//! Shared types for the agent core.

use serde::Serialize;

use crate::inference::types::{ChatMessage, Role, ToolCallRequest, ToolCallResponse};

// ─── Turns ──────────────────────────────────────────────────────────────────

/// A single entry in a session's history.
///
/// `content` is never absent: the empty string stands in for a missing value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Turn {
    /// Who produced this turn.
    pub role: Role,
    /// Text content.
    pub content: String,
    /// Tool calls requested by an assistant turn.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    /// For `tool` turns: the id of the request this result answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// RFC 3339 timestamp of when the turn was recorded.
    pub timestamp: String,
}

impl Turn {
    fn new(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn system(content: &str) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: &str) -> Self {
        Self::new(Role::User, content)
    }

    /// A plain assistant turn with no tool calls.
    pub fn assistant(content: &str) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// An assistant turn that requested tool invocations.
    pub fn assistant_with_calls(content: &str, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls,
            ..Self::new(Role::Assistant, content)
        }
    }

    /// A tool result answering `tool_call_id`.
    pub fn tool(tool_call_id: &str, content: &str) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.to_string()),
            ..Self::new(Role::Tool, content)
        }
    }

    /// The backend wire form of this turn.
    pub fn to_chat_message(&self) -> ChatMessage {
        let tool_calls = if self.tool_calls.is_empty() {
            None
        } else {
            Some(self.tool_calls.iter().map(ToolCallResponse::from).collect())
        };

        ChatMessage {
            role: self.role,
            content: Some(self.content.clone()),
            tool_call_id: self.tool_call_id.clone(),
            tool_calls,
        }
    }
}
