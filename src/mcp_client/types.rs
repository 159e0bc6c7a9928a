//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 message types, MCP protocol structures, and the provider
//! connection settings.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MCP protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (no id, no response).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
///
/// `id` is optional so provider-initiated notifications interleaved on the
/// same stream still deserialize and can be skipped.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(dead_code)]
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// MCP initialize response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(default, alias = "protocolVersion")]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default, alias = "serverInfo")]
    pub server_info: Option<ServerInfo>,
}

/// Server info returned in the initialize response.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

/// Attribute names that may carry a tool's parameter schema, in lookup order.
pub const SCHEMA_ATTRIBUTES: [&str; 4] = ["input_schema", "inputSchema", "parameters", "args"];

/// A tool advertised by the provider.
///
/// Everything besides `name` and `description` is kept verbatim in
/// `attributes` so schema lookup and prompt rendering can enumerate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

impl ToolDescriptor {
    /// The parameter schema: the first non-empty of [`SCHEMA_ATTRIBUTES`].
    pub fn schema(&self) -> Option<&Value> {
        SCHEMA_ATTRIBUTES
            .iter()
            .filter_map(|key| self.attributes.get(*key))
            .find(|value| is_truthy(value))
    }

    /// Sorted names of every attribute the descriptor carries, including
    /// `name` and `description`.
    pub fn attribute_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = ["name", "description"]
            .into_iter()
            .chain(self.attributes.keys().map(String::as_str))
            .collect();
        names.sort_unstable();
        names
    }
}

/// A readable resource advertised by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "mimeType")]
    pub mime_type: Option<String>,
}

/// Result of capability discovery on one connection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Discovery {
    pub tools: Vec<ToolDescriptor>,
    pub resources: Vec<ResourceDescriptor>,
}

// ─── Provider Results ────────────────────────────────────────────────────────

/// One entry of a `content` / `contents` list.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentItem(pub Value);

impl ContentItem {
    /// The item's `text` field, when it has one.
    pub fn text(&self) -> Option<&str> {
        self.0.get("text").and_then(Value::as_str)
    }
}

/// What a tool invocation or resource read returned.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderResult {
    /// A non-empty list of content items.
    Content(Vec<ContentItem>),
    /// A direct, non-empty text value.
    Text(String),
    /// Anything else, kept as structured data.
    Structured(Value),
    /// Nothing at all.
    Empty,
}

impl ProviderResult {
    /// Classify a raw JSON-RPC `result` value.
    ///
    /// Checked in order: content list (`content`, then `contents`), direct
    /// `text`, emptiness, then structured.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => ProviderResult::Empty,
            Value::String(s) if s.is_empty() => ProviderResult::Empty,
            Value::String(s) => ProviderResult::Text(s),
            Value::Object(map) => {
                for key in ["content", "contents"] {
                    if let Some(Value::Array(items)) = map.get(key) {
                        if !items.is_empty() {
                            return ProviderResult::Content(
                                items.iter().cloned().map(ContentItem).collect(),
                            );
                        }
                    }
                }
                if let Some(Value::String(text)) = map.get("text") {
                    if !text.is_empty() {
                        return ProviderResult::Text(text.clone());
                    }
                }
                if map.iter().all(|(k, v)| k == "_meta" || !is_truthy(v)) {
                    return ProviderResult::Empty;
                }
                ProviderResult::Structured(Value::Object(map))
            }
            other => ProviderResult::Structured(other),
        }
    }
}

/// Non-null, non-false, and non-empty for strings and collections.
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(_) => true,
    }
}

// ─── Provider Configuration ──────────────────────────────────────────────────

fn default_command() -> String {
    "python".to_string()
}
fn default_entry() -> String {
    "server.py".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

/// Wire protocol for a network provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkTransport {
    /// Legacy SSE when the URL path ends in `/sse`, streamable HTTP otherwise.
    #[default]
    Auto,
    /// Streamable HTTP: one POST per message.
    Http,
    /// Legacy HTTP+SSE: a GET event stream plus a POST message endpoint.
    Sse,
}

impl NetworkTransport {
    /// Parse a config or env value; unknown values fall back to `Auto`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "http" => NetworkTransport::Http,
            "sse" => NetworkTransport::Sse,
            _ => NetworkTransport::Auto,
        }
    }
}

/// How to reach the capability provider (`provider` section of the config).
///
/// When `url` is set the provider is reached over the network (see
/// [`NetworkTransport`]); otherwise `command entry args...` is spawned and
/// spoken to over stdio.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub transport: NetworkTransport,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default = "default_entry")]
    pub entry: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory for the spawned process; also the base for a
    /// relative `entry`.
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub init_timeout_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            url: None,
            transport: NetworkTransport::Auto,
            auth_token: None,
            command: default_command(),
            entry: default_entry(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            init_timeout_secs: default_timeout_secs(),
            call_timeout_secs: default_timeout_secs(),
        }
    }
}

impl ProviderConfig {
    /// The configured network endpoint, if non-blank.
    pub fn endpoint(&self) -> Option<&str> {
        self.url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }
}

// ─── Standard MCP Error Codes ────────────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_rpc_request_serialization() {
        let req = JsonRpcRequest::new(1, "initialize", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"method\":\"initialize\""));
        // params should be omitted when None
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_notification_has_no_id() {
        let note = JsonRpcNotification::new("notifications/initialized", None);
        let json = serde_json::to_string(&note).unwrap();
        assert!(!json.contains("\"id\""));
    }

    #[test]
    fn test_json_rpc_error_response() {
        let json = r#"{
            "jsonrpc": "2.0",
            "id": 2,
            "error": {"code": -32601, "message": "Method not found"}
        }"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.id, Some(2));
        assert_eq!(resp.error.unwrap().code, error_codes::METHOD_NOT_FOUND);
    }

    #[test]
    fn test_server_notification_parses_without_id() {
        let json = r#"{"jsonrpc":"2.0","method":"notifications/message","params":{}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(json).unwrap();
        assert!(resp.id.is_none());
    }

    #[test]
    fn test_tool_descriptor_schema_precedence() {
        let tool: ToolDescriptor = serde_json::from_value(json!({
            "name": "list_clusters",
            "description": "List clusters",
            "parameters": {"type": "object", "properties": {"x": {}}},
            "inputSchema": {"type": "object", "properties": {"customer": {"type": "string"}}}
        }))
        .unwrap();
        let schema = tool.schema().unwrap();
        assert!(schema["properties"].get("customer").is_some());
    }

    #[test]
    fn test_tool_descriptor_skips_empty_schema() {
        let tool: ToolDescriptor = serde_json::from_value(json!({
            "name": "t",
            "input_schema": {},
            "args": {"type": "object"}
        }))
        .unwrap();
        assert_eq!(tool.schema(), Some(&json!({"type": "object"})));
    }

    #[test]
    fn test_tool_descriptor_without_schema_lists_attributes() {
        let tool: ToolDescriptor = serde_json::from_value(json!({
            "name": "t",
            "title": "T",
            "annotations": {"readOnlyHint": true}
        }))
        .unwrap();
        assert!(tool.schema().is_none());
        assert!(tool.description.is_none());
        assert_eq!(
            tool.attribute_names(),
            vec!["annotations", "description", "name", "title"]
        );
    }

    #[test]
    fn test_resource_descriptor_mime_type_alias() {
        let res: ResourceDescriptor = serde_json::from_value(json!({
            "uri": "cass://clusters",
            "mimeType": "application/json"
        }))
        .unwrap();
        assert_eq!(res.mime_type.as_deref(), Some("application/json"));
    }

    #[test]
    fn test_provider_result_classification() {
        let content = ProviderResult::from_value(json!({
            "content": [{"type": "text", "text": "a"}],
            "isError": false
        }));
        assert!(matches!(content, ProviderResult::Content(ref items) if items.len() == 1));

        let contents = ProviderResult::from_value(json!({
            "contents": [{"uri": "cass://x", "text": "b"}]
        }));
        assert!(matches!(contents, ProviderResult::Content(_)));

        assert_eq!(
            ProviderResult::from_value(json!({"text": "hi"})),
            ProviderResult::Text("hi".into())
        );
        assert_eq!(
            ProviderResult::from_value(json!({"content": [], "isError": false})),
            ProviderResult::Empty
        );
        assert_eq!(ProviderResult::from_value(Value::Null), ProviderResult::Empty);
        assert_eq!(
            ProviderResult::from_value(json!({"clusters": ["a"]})),
            ProviderResult::Structured(json!({"clusters": ["a"]}))
        );
    }

    #[test]
    fn test_provider_config_defaults() {
        let config: ProviderConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.command, "python");
        assert_eq!(config.entry, "server.py");
        assert_eq!(config.init_timeout_secs, 30);
        assert!(config.endpoint().is_none());
        assert_eq!(config.transport, NetworkTransport::Auto);

        let config: ProviderConfig = serde_yaml::from_str("transport: sse").unwrap();
        assert_eq!(config.transport, NetworkTransport::Sse);
        assert_eq!(NetworkTransport::from_name(" HTTP "), NetworkTransport::Http);
        assert_eq!(NetworkTransport::from_name("bogus"), NetworkTransport::Auto);

        let config = ProviderConfig {
            url: Some("  ".into()),
            ..ProviderConfig::default()
        };
        assert!(config.endpoint().is_none());
    }
}
