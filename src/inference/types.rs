//! Shared types for the inference client.
//!
//! These mirror the OpenAI Chat Completions API types, used for both
//! request building and response parsing.

use serde::{Deserialize, Serialize};

// ─── Request Types ───────────────────────────────────────────────────────────

/// A single message in the conversation, as sent to the backend.
///
/// `content` is always serialized as a string: `""` stands in for a missing
/// value so assistant messages that only carry tool calls stay well-formed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(serialize_with = "serialize_content")]
    pub content: Option<String>,
    /// Tool call results are sent back as `tool` role messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Assistant messages may contain tool calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallResponse>>,
}

/// Emit `""` instead of `null` when `content` is `None`.
fn serialize_content<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(s) => serializer.serialize_str(s),
        None => serializer.serialize_str(""),
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Tool definition sent in the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub r#type: String,
    pub function: FunctionDefinition,
}

impl ToolDefinition {
    /// Build a `function`-typed tool definition.
    pub fn function(name: &str, description: &str, parameters: serde_json::Value) -> Self {
        Self {
            r#type: "function".to_string(),
            function: FunctionDefinition {
                name: name.to_string(),
                description: description.to_string(),
                parameters,
            },
        }
    }
}

/// Function definition within a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Request body for `POST /chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

// ─── Response Types ──────────────────────────────────────────────────────────

/// A tool invocation requested by the model.
///
/// `raw_arguments` is kept exactly as the backend sent it. Parsing happens at
/// dispatch time, where malformed input degrades to an empty argument object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Identifier the tool result must reference.
    pub id: String,
    /// Tool name as advertised in the schema list.
    pub name: String,
    /// Raw JSON argument text.
    pub raw_arguments: String,
}

impl ToolCallRequest {
    pub fn new(id: &str, name: &str, raw_arguments: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            raw_arguments: raw_arguments.to_string(),
        }
    }
}

/// Tool call as carried in the OpenAI message format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResponse {
    pub id: String,
    pub r#type: String,
    pub function: FunctionCallResponse,
}

impl From<&ToolCallRequest> for ToolCallResponse {
    fn from(call: &ToolCallRequest) -> Self {
        Self {
            id: call.id.clone(),
            r#type: "function".to_string(),
            function: FunctionCallResponse {
                name: call.name.clone(),
                arguments: call.raw_arguments.clone(),
            },
        }
    }
}

/// Function call details in a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallResponse {
    pub name: String,
    pub arguments: String,
}

/// One assistant message returned by the backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantReply {
    /// Assistant text, if any.
    pub content: Option<String>,
    /// Tool invocations requested in this reply, in the order received.
    pub tool_calls: Vec<ToolCallRequest>,
}

impl AssistantReply {
    /// A reply with text and no tool calls.
    pub fn text(content: &str) -> Self {
        Self {
            content: Some(content.to_string()),
            tool_calls: Vec::new(),
        }
    }

    /// Whether the model asked for any tool invocations.
    pub fn wants_tools(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// The assistant text, with `""` standing in for a missing value.
    pub fn content_or_empty(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
