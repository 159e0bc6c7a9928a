//! Streamable HTTP transport for network-reachable providers.
//!
//! Every JSON-RPC message is an HTTP POST to the provider endpoint. The
//! provider answers with either a plain JSON body or a `text/event-stream`
//! whose `data:` lines carry the response. The `mcp-session-id` header handed
//! out by the provider is echoed on later requests and used for the
//! best-effort `DELETE` on close.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use tokio::sync::RwLock;

use super::errors::McpError;
use super::transport::{next_request_id, Transport};
use super::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// Header carrying the provider-assigned session id.
const SESSION_HEADER: &str = "mcp-session-id";

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Streamable HTTP transport.
pub struct HttpTransport {
    server_name: String,
    url: String,
    auth_token: Option<String>,
    client: Client,
    timeout: Duration,
    session_id: RwLock<Option<String>>,
}

impl HttpTransport {
    /// Create a transport for `url`. No request is made until the handshake.
    pub fn new(
        server_name: &str,
        url: &str,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, McpError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .map_err(|e| McpError::TransportError {
                server: server_name.to_string(),
                reason: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            server_name: server_name.to_string(),
            url: url.to_string(),
            auth_token: auth_token.filter(|t| !t.trim().is_empty()),
            client,
            timeout,
            session_id: RwLock::new(None),
        })
    }

    fn transport_error(&self, reason: String) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason,
        }
    }

    /// POST with the common headers.
    async fn post(&self, body: String) -> Result<reqwest::Response, McpError> {
        let mut req = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(body);

        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }
        if let Some(session) = self.session_id.read().await.as_deref() {
            req = req.header(SESSION_HEADER, session);
        }

        let response = req.send().await.map_err(|e| {
            if e.is_timeout() {
                McpError::Timeout {
                    operation: format!("POST {}", self.url),
                    timeout_ms: self.timeout.as_millis() as u64,
                }
            } else {
                self.transport_error(format!("request failed: {e}"))
            }
        })?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut current = self.session_id.write().await;
            if current.as_deref() != Some(session) {
                tracing::debug!(server = %self.server_name, session, "provider session id assigned");
                *current = Some(session.to_string());
            }
        }

        Ok(response)
    }

    /// Read a JSON or SSE response body and return the response for `id`.
    async fn read_response(
        &self,
        response: reqwest::Response,
        id: u64,
    ) -> Result<JsonRpcResponse, McpError> {
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.transport_error(format!("provider returned {status}: {text}")));
        }

        let is_event_stream = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("text/event-stream"))
            .unwrap_or(false);

        if is_event_stream {
            return self.read_event_stream(response, id).await;
        }

        let text = response
            .text()
            .await
            .map_err(|e| self.transport_error(format!("failed to read response: {e}")))?;
        serde_json::from_str(&text)
            .map_err(|e| self.transport_error(format!("invalid JSON response: {e}")))
    }

    /// Scan `data:` lines until the response with the matching id arrives.
    async fn read_event_stream(
        &self,
        response: reqwest::Response,
        id: u64,
    ) -> Result<JsonRpcResponse, McpError> {
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.transport_error(format!("stream error: {e}")))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line: String = buffer.drain(..=newline).collect();
                if let Some(resp) = parse_data_line(&line) {
                    if resp.id == Some(id) {
                        return Ok(resp);
                    }
                }
            }
        }

        // The final event may not be newline-terminated.
        if let Some(resp) = parse_data_line(&buffer) {
            if resp.id == Some(id) {
                return Ok(resp);
            }
        }

        Err(self.transport_error("event stream ended without a response".into()))
    }
}

/// Parse one SSE line as a JSON-RPC response, if it is a `data:` line.
fn parse_data_line(line: &str) -> Option<JsonRpcResponse> {
    let data = line.trim_end_matches(['\r', '\n']).strip_prefix("data:")?;
    serde_json::from_str(data.trim_start()).ok()
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = next_request_id();
        let body = serde_json::to_string(&JsonRpcRequest::new(id, method, params))
            .map_err(|e| self.transport_error(format!("failed to serialize request: {e}")))?;

        tracing::debug!(server = %self.server_name, id, method, "sending HTTP request");
        let response = self.post(body).await?;
        self.read_response(response, id).await
    }

    async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let body = serde_json::to_string(&JsonRpcNotification::new(method, params)).map_err(
            |e| self.transport_error(format!("failed to serialize notification: {e}")),
        )?;

        let response = self.post(body).await?;
        // 202 Accepted is the normal answer; anything non-2xx is only logged.
        if response.status() != StatusCode::ACCEPTED && !response.status().is_success() {
            tracing::warn!(
                server = %self.server_name,
                method,
                status = %response.status(),
                "notification returned non-success status"
            );
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), McpError> {
        let Some(session) = self.session_id.write().await.take() else {
            return Ok(());
        };

        let mut req = self.client.delete(&self.url).header(SESSION_HEADER, &session);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }

        // Best-effort: providers may not support explicit session teardown.
        match req.send().await {
            Ok(resp) => {
                tracing::debug!(server = %self.server_name, status = %resp.status(), "provider session closed");
            }
            Err(e) => {
                tracing::debug!(server = %self.server_name, error = %e, "provider session DELETE failed");
            }
        }
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
