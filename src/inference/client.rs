//! OpenAI-compatible inference client.
//!
//! Sends non-streaming chat completion requests (message history + tool
//! catalog) and returns the assistant message, possibly with tool calls.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::config::BackendConfig;
use super::errors::InferenceError;
use super::response::parse_completion_response;
use super::types::{AssistantReply, ChatCompletionRequest, ChatMessage, ToolDefinition};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ─── ChatBackend ─────────────────────────────────────────────────────────────

/// The language-model backend as seen by the agent loop:
/// messages + tool catalog in, one assistant message out.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<AssistantReply, InferenceError>;
}

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// Client for an OpenAI-compatible `/chat/completions` endpoint.
pub struct InferenceClient {
    http: HttpClient,
    config: BackendConfig,
}

impl InferenceClient {
    /// Create a client from the backend configuration.
    ///
    /// Does NOT check connectivity; that happens on the first request.
    pub fn from_config(config: BackendConfig) -> Result<Self, InferenceError> {
        config.validate()?;

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { http, config })
    }

    /// The configured model name.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn build_request(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> ChatCompletionRequest {
        let tools = if tools.is_empty() {
            None
        } else {
            Some(tools.to_vec())
        };

        ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: messages.to_vec(),
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            tools,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }
}

#[async_trait]
impl ChatBackend for InferenceClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<AssistantReply, InferenceError> {
        let url = self.config.completions_url();
        let body = self.build_request(messages, tools);

        // Log the request metadata (not the full body, it can be huge)
        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            "sending chat completion request"
        );

        let mut request = self.http.post(&url).json(&body);
        if let Some(key) = self.config.api_key() {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout {
                    duration_secs: self.config.request_timeout_secs,
                }
            } else {
                InferenceError::ConnectionFailed {
                    endpoint: url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "backend returned an error status");
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let body_text = response
            .text()
            .await
            .map_err(|e| InferenceError::MalformedResponse {
                reason: format!("failed to read response body: {e}"),
            })?;

        let reply = parse_completion_response(&body_text)?;

        tracing::debug!(
            content_len = reply.content_or_empty().len(),
            tool_calls = reply.tool_calls.len(),
            "chat completion received"
        );

        Ok(reply)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
