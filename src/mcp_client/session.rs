//! MCP session — the protocol layer on top of a [`Transport`].
//!
//! One session per inbound request: handshake, discovery, then any number of
//! tool invocations and resource reads until the releaser closes it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::errors::McpError;
use super::transport::{extract_result, Transport};
use super::types::{
    Discovery, InitializeResult, ProviderResult, ResourceDescriptor, ToolDescriptor,
    PROTOCOL_VERSION,
};

/// Upper bound on `nextCursor` pages followed per list call.
const MAX_LIST_PAGES: usize = 100;

// ─── ProviderSession ─────────────────────────────────────────────────────────

/// The capability provider as seen by the orchestrator.
#[async_trait]
pub trait ProviderSession: Send + Sync {
    /// List every tool and resource the provider currently exposes.
    async fn discover(&self) -> Result<Discovery, McpError>;

    /// Invoke a tool by name.
    async fn invoke_tool(&self, name: &str, arguments: Value) -> Result<ProviderResult, McpError>;

    /// Read a resource by URI.
    async fn read_resource(&self, uri: &str) -> Result<ProviderResult, McpError>;
}

// ─── McpSession ──────────────────────────────────────────────────────────────

/// A live MCP session over any transport.
pub struct McpSession {
    name: String,
    transport: Arc<dyn Transport>,
    call_timeout: Duration,
}

impl McpSession {
    pub fn new(name: &str, transport: Arc<dyn Transport>, call_timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            transport,
            call_timeout,
        }
    }

    /// Perform the `initialize` handshake followed by
    /// `notifications/initialized`.
    pub async fn initialize(&self) -> Result<InitializeResult, McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        });

        let response = self.transport.request("initialize", Some(params)).await?;
        let result = extract_result(response)?;
        let init: InitializeResult =
            serde_json::from_value(result).map_err(|e| McpError::InitFailed {
                name: self.name.clone(),
                reason: format!("failed to parse initialize response: {e}"),
            })?;

        self.transport
            .notify("notifications/initialized", None)
            .await?;

        tracing::info!(
            server = %self.name,
            protocol_version = init.protocol_version.as_deref().unwrap_or("unknown"),
            server_name = init.server_info.as_ref().and_then(|s| s.name.as_deref()).unwrap_or("unknown"),
            "provider session initialized"
        );

        Ok(init)
    }

    /// Issue a request bounded by the per-call timeout.
    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let response = tokio::time::timeout(self.call_timeout, self.transport.request(method, params))
            .await
            .map_err(|_| McpError::Timeout {
                operation: method.to_string(),
                timeout_ms: self.call_timeout.as_millis() as u64,
            })??;
        extract_result(response)
    }

    /// Follow `nextCursor` pagination, collecting `field` from every page.
    async fn list_all<T: DeserializeOwned>(
        &self,
        method: &str,
        field: &str,
    ) -> Result<Vec<T>, McpError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let mut page = self.call(method, params).await?;

            let entries = page.get_mut(field).map(Value::take).unwrap_or(Value::Null);
            if !entries.is_null() {
                let parsed: Vec<T> =
                    serde_json::from_value(entries).map_err(|e| McpError::TransportError {
                        server: self.name.clone(),
                        reason: format!("malformed {method} result: {e}"),
                    })?;
                items.extend(parsed);
            }

            cursor = page
                .get("nextCursor")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(str::to_string);
            if cursor.is_none() {
                return Ok(items);
            }
        }

        tracing::warn!(server = %self.name, method, "pagination limit reached, list truncated");
        Ok(items)
    }
}

#[async_trait]
impl ProviderSession for McpSession {
    async fn discover(&self) -> Result<Discovery, McpError> {
        let tools: Vec<ToolDescriptor> = self.list_all("tools/list", "tools").await?;

        // Providers without resources may not implement the method at all.
        let resources: Vec<ResourceDescriptor> =
            match self.list_all("resources/list", "resources").await {
                Ok(resources) => resources,
                Err(e) if e.is_method_not_found() => Vec::new(),
                Err(e) => return Err(e),
            };

        tracing::info!(
            server = %self.name,
            tools = tools.len(),
            resources = resources.len(),
            "capabilities discovered"
        );

        Ok(Discovery { tools, resources })
    }

    async fn invoke_tool(&self, name: &str, arguments: Value) -> Result<ProviderResult, McpError> {
        let params = json!({ "name": name, "arguments": arguments });
        let result = self.call("tools/call", Some(params)).await?;
        Ok(ProviderResult::from_value(result))
    }

    async fn read_resource(&self, uri: &str) -> Result<ProviderResult, McpError> {
        let result = self.call("resources/read", Some(json!({ "uri": uri }))).await?;
        Ok(ProviderResult::from_value(result))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
