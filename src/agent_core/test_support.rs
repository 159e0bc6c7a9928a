//! In-crate fakes for the backend, provider session, transport, and
//! connector seams. Compiled for tests only.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::inference::types::{AssistantReply, ChatMessage, ToolDefinition};
use crate::inference::{ChatBackend, InferenceError};
use crate::mcp_client::errors::McpError;
use crate::mcp_client::lifecycle::{Connector, Releaser};
use crate::mcp_client::session::ProviderSession;
use crate::mcp_client::transport::Transport;
use crate::mcp_client::types::{
    Discovery, JsonRpcError, JsonRpcResponse, ProviderResult, ResourceDescriptor, ToolDescriptor,
};

// ─── FakeBackend ────────────────────────────────────────────────────────────

enum Script {
    Replies(Mutex<VecDeque<AssistantReply>>),
    Always(AssistantReply),
    Fail(Mutex<Option<InferenceError>>),
}

/// Scripted [`ChatBackend`] that records every request.
pub struct FakeBackend {
    script: Script,
    delay: Option<Duration>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl FakeBackend {
    /// Replies in order; an exhausted script answers with empty text.
    pub fn scripted(replies: Vec<AssistantReply>) -> Self {
        Self::with_script(Script::Replies(Mutex::new(replies.into())))
    }

    /// The same reply on every call.
    pub fn always(reply: AssistantReply) -> Self {
        Self::with_script(Script::Always(reply))
    }

    /// Fails the first call with `error`.
    pub fn failing(error: InferenceError) -> Self {
        Self::with_script(Script::Fail(Mutex::new(Some(error))))
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolDefinition],
    ) -> Result<AssistantReply, InferenceError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.script {
            Script::Replies(queue) => Ok(queue.lock().unwrap().pop_front().unwrap_or_default()),
            Script::Always(reply) => Ok(reply.clone()),
            Script::Fail(error) => Err(error.lock().unwrap().take().unwrap_or(
                InferenceError::MalformedResponse {
                    reason: "fake backend exhausted".into(),
                },
            )),
        }
    }
}

// ─── FakeProvider ───────────────────────────────────────────────────────────

/// In-memory [`ProviderSession`] with canned tool and resource results.
#[derive(Default)]
pub struct FakeProvider {
    discovery: Discovery,
    tool_results: HashMap<String, Value>,
    resources: HashMap<String, Value>,
    invocations: Mutex<Vec<(String, Value)>>,
    resource_reads: Mutex<Vec<String>>,
    discover_calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise a tool (raw descriptor JSON) during discovery.
    pub fn with_tool(mut self, descriptor: Value) -> Self {
        let tool: ToolDescriptor = serde_json::from_value(descriptor).unwrap();
        self.discovery.tools.push(tool);
        self
    }

    /// Advertise a resource during discovery.
    pub fn with_listed_resource(mut self, uri: &str, description: &str) -> Self {
        self.discovery.resources.push(ResourceDescriptor {
            uri: uri.to_string(),
            name: None,
            description: Some(description.to_string()),
            mime_type: None,
        });
        self
    }

    /// Raw `tools/call` result for `name`.
    pub fn with_tool_result(mut self, name: &str, result: Value) -> Self {
        self.tool_results.insert(name.to_string(), result);
        self
    }

    /// Raw `resources/read` result for `uri`.
    pub fn with_resource(mut self, uri: &str, result: Value) -> Self {
        self.resources.insert(uri.to_string(), result);
        self
    }

    pub fn invocations(&self) -> Vec<(String, Value)> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn resource_reads(&self) -> Vec<String> {
        self.resource_reads.lock().unwrap().clone()
    }

    pub fn discover_calls(&self) -> usize {
        self.discover_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderSession for FakeProvider {
    async fn discover(&self) -> Result<Discovery, McpError> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.discovery.clone())
    }

    async fn invoke_tool(&self, name: &str, arguments: Value) -> Result<ProviderResult, McpError> {
        self.invocations
            .lock()
            .unwrap()
            .push((name.to_string(), arguments));
        match self.tool_results.get(name) {
            Some(result) => Ok(ProviderResult::from_value(result.clone())),
            None => Err(McpError::ServerError {
                code: -32602,
                message: format!("Unknown tool: {name}"),
                data: None,
            }),
        }
    }

    async fn read_resource(&self, uri: &str) -> Result<ProviderResult, McpError> {
        self.resource_reads.lock().unwrap().push(uri.to_string());
        match self.resources.get(uri) {
            Some(result) => Ok(ProviderResult::from_value(result.clone())),
            None => Err(McpError::ServerError {
                code: -32002,
                message: format!("Resource not found: {uri}"),
                data: None,
            }),
        }
    }
}

/// Lets a shared fake be handed out as a boxed session while the test keeps
/// a handle for assertions.
#[async_trait]
impl ProviderSession for Arc<FakeProvider> {
    async fn discover(&self) -> Result<Discovery, McpError> {
        self.as_ref().discover().await
    }

    async fn invoke_tool(&self, name: &str, arguments: Value) -> Result<ProviderResult, McpError> {
        self.as_ref().invoke_tool(name, arguments).await
    }

    async fn read_resource(&self, uri: &str) -> Result<ProviderResult, McpError> {
        self.as_ref().read_resource(uri).await
    }
}

// ─── ScriptedTransport ──────────────────────────────────────────────────────

type Scripted = Result<Value, (i32, String)>;

/// [`Transport`] answering from per-method queues.
///
/// Methods with no queued answer get a "Method not found" error.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<HashMap<String, VecDeque<Scripted>>>,
    hanging: Mutex<HashSet<String>>,
    sent: Mutex<Vec<(String, Option<Value>)>>,
    notifications: Mutex<Vec<String>>,
    closes: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful result for `method`.
    pub fn reply(&self, method: &str, result: Value) {
        self.push(method, Ok(result));
    }

    /// Queue a JSON-RPC error for `method`.
    pub fn fail(&self, method: &str, code: i32, message: &str) {
        self.push(method, Err((code, message.to_string())));
    }

    /// Never answer `method`.
    pub fn hang(&self, method: &str) {
        self.hanging.lock().unwrap().insert(method.to_string());
    }

    fn push(&self, method: &str, entry: Scripted) {
        self.replies
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(entry);
    }

    pub fn sent(&self) -> Vec<(String, Option<Value>)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<String> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse, McpError> {
        self.sent.lock().unwrap().push((method.to_string(), params));

        if self.hanging.lock().unwrap().contains(method) {
            futures::future::pending::<()>().await;
        }

        let next = self
            .replies
            .lock()
            .unwrap()
            .get_mut(method)
            .and_then(VecDeque::pop_front);

        let (result, error) = match next {
            Some(Ok(value)) => (Some(value), None),
            Some(Err((code, message))) => (None, Some(JsonRpcError { code, message, data: None })),
            None => (
                None,
                Some(JsonRpcError {
                    code: -32601,
                    message: "Method not found".into(),
                    data: None,
                }),
            ),
        };

        Ok(JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: Some(0),
            result,
            error,
        })
    }

    async fn notify(&self, method: &str, _params: Option<Value>) -> Result<(), McpError> {
        self.notifications.lock().unwrap().push(method.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), McpError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ─── FakeConnector ──────────────────────────────────────────────────────────

/// [`Connector`] handing out a shared [`FakeProvider`], or a fixed error.
pub struct FakeConnector {
    pub provider: Arc<FakeProvider>,
    pub transport: Arc<ScriptedTransport>,
    error: Option<fn() -> McpError>,
    connects: AtomicUsize,
}

impl FakeConnector {
    pub fn new(provider: FakeProvider) -> Self {
        Self {
            provider: Arc::new(provider),
            transport: Arc::new(ScriptedTransport::new()),
            error: None,
            connects: AtomicUsize::new(0),
        }
    }

    /// Every connect attempt fails with `make_error()`.
    pub fn failing(make_error: fn() -> McpError) -> Self {
        Self {
            error: Some(make_error),
            ..Self::new(FakeProvider::new())
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<(Box<dyn ProviderSession>, Releaser), McpError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(make_error) = self.error {
            return Err(make_error());
        }
        let releaser = Releaser::new("fake", self.transport.clone());
        Ok((Box::new(self.provider.clone()), releaser))
    }

    fn describe(&self) -> String {
        "fake".to_string()
    }
}
