//! Chat completion response parsing.
//!
//! Turns a raw `/chat/completions` body into an [`AssistantReply`]. Parsing is
//! lenient about the message itself (missing content, missing tool-call ids,
//! object-valued arguments) and strict only about the envelope.

use serde::Deserialize;
use uuid::Uuid;

use super::errors::InferenceError;
use super::types::{AssistantReply, ToolCallRequest};

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<CompletionToolCall>>,
}

#[derive(Deserialize)]
struct CompletionToolCall {
    #[serde(default)]
    id: Option<String>,
    function: CompletionFunction,
}

#[derive(Deserialize)]
struct CompletionFunction {
    name: String,
    /// Usually a JSON string, but some backends send the object itself.
    #[serde(default)]
    arguments: Option<serde_json::Value>,
}

/// Parse a non-streaming chat completion body.
///
/// A message with neither content nor tool calls parses to an empty reply;
/// the caller treats that as a finished turn with empty text.
pub fn parse_completion_response(body: &str) -> Result<AssistantReply, InferenceError> {
    let resp: CompletionResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::MalformedResponse {
            reason: format!("failed to parse completion response: {e}"),
        })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(InferenceError::MalformedResponse {
            reason: "empty choices array".into(),
        })?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCallRequest {
            id: tc
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("call_{}", Uuid::new_v4())),
            name: tc.function.name,
            raw_arguments: raw_arguments_text(tc.function.arguments),
        })
        .collect();

    Ok(AssistantReply {
        content: choice.message.content,
        tool_calls,
    })
}

/// Normalize the `arguments` field to text, defaulting to `"{}"`.
fn raw_arguments_text(value: Option<serde_json::Value>) -> String {
    match value {
        None | Some(serde_json::Value::Null) => "{}".to_string(),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => "{}".to_string(),
        Some(serde_json::Value::String(s)) => s,
        Some(other) => other.to_string(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
