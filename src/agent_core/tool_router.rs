//! ToolRouter — executes model tool calls against the provider session.
//!
//! The ToolRouter is the bridge between the model's tool call decisions and
//! the capability provider. It handles:
//! - Lenient argument parsing (malformed input becomes `{}`)
//! - Routing `mcp_read_resource` to a resource read, everything else to a
//!   tool invocation
//! - Normalizing whatever the provider returned into model-facing text
//! - Turning provider errors and timeouts into failure text
//!
//! Execution never fails: every call yields a [`ToolOutcome`].

use std::time::Instant;

use serde_json::{Map, Value};

use crate::inference::types::ToolCallRequest;
use crate::mcp_client::session::ProviderSession;
use crate::mcp_client::types::ProviderResult;

use super::catalog::RESOURCE_READER_TOOL;

// ─── Constants ──────────────────────────────────────────────────────────────

/// Upper bound on a single tool result fed back to the model (bytes).
pub const MAX_TOOL_RESULT_CHARS: usize = 16_000;

/// Placeholder for a tool invocation that produced nothing.
pub const NO_RESULT: &str = "(no result)";

/// Placeholder for a resource read that produced nothing.
pub const NO_CONTENT: &str = "(no content)";

// ─── ToolOutcome ────────────────────────────────────────────────────────────

/// Result of executing one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    /// Normalized, non-empty result text.
    Success(String),
    /// The provider call failed or timed out.
    Failure { tool: String, reason: String },
}

impl ToolOutcome {
    /// The text recorded in the tool turn.
    pub fn model_text(&self) -> String {
        match self {
            ToolOutcome::Success(text) => text.clone(),
            ToolOutcome::Failure { tool, reason } => {
                format!("Error executing tool '{tool}': {reason}")
            }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success(_))
    }
}

// ─── ToolRouter ─────────────────────────────────────────────────────────────

/// Dispatches tool calls to a provider session.
pub struct ToolRouter {
    max_result_chars: usize,
}

impl Default for ToolRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRouter {
    pub fn new() -> Self {
        Self {
            max_result_chars: MAX_TOOL_RESULT_CHARS,
        }
    }

    /// Override the result size cap.
    pub fn with_max_result_chars(mut self, max: usize) -> Self {
        self.max_result_chars = max;
        self
    }

    // ─── Dispatch ───────────────────────────────────────────────────────

    /// Execute every call strictly in the order received.
    pub async fn dispatch_all(
        &self,
        session: &dyn ProviderSession,
        calls: &[ToolCallRequest],
    ) -> Vec<(ToolCallRequest, ToolOutcome)> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let outcome = self.execute(session, &call.name, &call.raw_arguments).await;
            results.push((call.clone(), outcome));
        }
        results
    }

    /// Execute one call: parse → route → normalize.
    pub async fn execute(
        &self,
        session: &dyn ProviderSession,
        name: &str,
        raw_arguments: &str,
    ) -> ToolOutcome {
        let start = Instant::now();
        let args = parse_arguments(raw_arguments);

        let (result, placeholder) = if name == RESOURCE_READER_TOOL {
            let uri = args.get("uri").and_then(Value::as_str).unwrap_or("");
            (session.read_resource(uri).await, NO_CONTENT)
        } else {
            (session.invoke_tool(name, Value::Object(args)).await, NO_RESULT)
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(result) => {
                let text = normalize_result(result, placeholder);
                let text = self.cap(text);
                tracing::info!(tool = name, elapsed_ms, result_len = text.len(), "tool executed");
                ToolOutcome::Success(text)
            }
            Err(e) => {
                tracing::warn!(tool = name, elapsed_ms, error = %e, "tool execution failed");
                ToolOutcome::Failure {
                    tool: name.to_string(),
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Truncate oversized results on a UTF-8 boundary.
    fn cap(&self, text: String) -> String {
        if text.len() <= self.max_result_chars {
            return text;
        }
        let kept = truncate_utf8(&text, self.max_result_chars);
        format!(
            "{kept}\n...(truncated {} of {} bytes)",
            text.len() - kept.len(),
            text.len()
        )
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Parse raw argument text as a JSON object; anything else becomes `{}`.
pub fn parse_arguments(raw: &str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            tracing::debug!(raw, "tool arguments are not a JSON object, using {{}}");
            Map::new()
        }
    }
}

/// Render a provider result as text, in a fixed precedence order.
///
/// Content items contribute their text, or compact JSON when they have none,
/// joined by newlines. Direct text is used as is. Structured values are
/// pretty-printed. The result is never empty.
pub fn normalize_result(result: ProviderResult, placeholder: &str) -> String {
    let text = match result {
        ProviderResult::Content(items) => items
            .iter()
            .map(|item| match item.text() {
                Some(text) => text.to_string(),
                None => serde_json::to_string(&item.0).unwrap_or_else(|_| placeholder.into()),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        ProviderResult::Text(text) => text,
        ProviderResult::Structured(value) => {
            serde_json::to_string_pretty(&value).unwrap_or_else(|_| placeholder.into())
        }
        ProviderResult::Empty => String::new(),
    };

    if text.is_empty() {
        placeholder.to_string()
    } else {
        text
    }
}

/// Longest prefix of `s` no longer than `max_bytes` that ends on a char boundary.
fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ─── Tests ──────────────────────────────────────────────────────────────────
