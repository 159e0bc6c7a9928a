//! Legacy HTTP+SSE transport.
//!
//! ```text
//! client                                  provider
//!   │── GET <url> (text/event-stream) ──────►│
//!   │◄── event: endpoint  data: /messages?.. ─│
//!   │── POST <endpoint> {jsonrpc request} ──►│  202 Accepted
//!   │◄── event: message   data: {response} ───│
//! ```
//!
//! The event stream stays open for the life of the transport. A background
//! reader matches `message` events to waiting requests by JSON-RPC id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Url};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use super::errors::McpError;
use super::transport::{next_request_id, Transport};
use super::types::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Requests waiting for their `message` event, keyed by JSON-RPC id.
type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

// ─── Event parsing ───────────────────────────────────────────────────────────

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SseEvent {
    event: String,
    data: String,
}

/// Incremental `text/event-stream` parser.
#[derive(Debug, Default)]
struct EventParser {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
}

impl EventParser {
    /// Feed a chunk and return the events it completed.
    fn feed(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.find('\n') {
            let raw: String = self.buffer.drain(..=newline).collect();
            let line = raw.trim_end_matches(['\r', '\n']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(SseEvent {
                        event: self.event.take().unwrap_or_else(|| "message".to_string()),
                        data: self.data.join("\n"),
                    });
                    self.data.clear();
                }
                self.event = None;
                continue;
            }
            // Comment line, used for keep-alives.
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }

        events
    }
}

// ─── SseTransport ────────────────────────────────────────────────────────────

/// Legacy HTTP+SSE transport.
pub struct SseTransport {
    server_name: String,
    endpoint: Url,
    auth_token: Option<String>,
    client: Client,
    timeout: Duration,
    pending: Pending,
    reader: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SseTransport {
    /// Open the event stream and wait for the provider's `endpoint` event.
    pub async fn connect(
        server_name: &str,
        url: &str,
        auth_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, McpError> {
        let transport_error = |reason: String| McpError::TransportError {
            server: server_name.to_string(),
            reason,
        };
        let timeout_ms = timeout.as_millis() as u64;

        let base = Url::parse(url).map_err(|e| transport_error(format!("invalid url '{url}': {e}")))?;
        let auth_token = auth_token.filter(|t| !t.trim().is_empty());

        // No overall request timeout: the event stream is long-lived.
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| transport_error(format!("failed to create HTTP client: {e}")))?;

        let mut req = client.get(base.clone()).header("Accept", "text/event-stream");
        if let Some(token) = &auth_token {
            req = req.bearer_auth(token);
        }

        let response = tokio::time::timeout(timeout, req.send())
            .await
            .map_err(|_| McpError::Timeout {
                operation: format!("GET {url}"),
                timeout_ms,
            })?
            .map_err(|e| transport_error(format!("event stream request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(transport_error(format!("provider returned {status}: {text}")));
        }

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let reader = tokio::spawn(read_events(
            server_name.to_string(),
            response,
            Arc::clone(&pending),
            endpoint_tx,
        ));

        let endpoint = match tokio::time::timeout(timeout, endpoint_rx).await {
            Ok(Ok(path)) => base
                .join(&path)
                .map_err(|e| transport_error(format!("invalid endpoint '{path}': {e}"))),
            Ok(Err(_)) => Err(transport_error(
                "event stream ended before the endpoint event".into(),
            )),
            Err(_) => Err(McpError::Timeout {
                operation: "waiting for endpoint event".into(),
                timeout_ms,
            }),
        };
        let endpoint = match endpoint {
            Ok(endpoint) => endpoint,
            Err(e) => {
                reader.abort();
                return Err(e);
            }
        };

        tracing::debug!(server = server_name, endpoint = %endpoint, "provider message endpoint received");

        Ok(Self {
            server_name: server_name.to_string(),
            endpoint,
            auth_token,
            client,
            timeout,
            pending,
            reader: std::sync::Mutex::new(Some(reader)),
        })
    }

    fn transport_error(&self, reason: String) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason,
        }
    }

    /// Whether the background reader has stopped (stream ended or closed).
    fn stream_closed(&self) -> bool {
        match self.reader.lock() {
            Ok(guard) => guard.as_ref().map_or(true, |reader| reader.is_finished()),
            Err(_) => true,
        }
    }

    /// POST one message to the endpoint.
    async fn post(&self, body: String) -> Result<reqwest::Response, McpError> {
        let mut req = self
            .client
            .post(self.endpoint.clone())
            .timeout(self.timeout)
            .header("Content-Type", "application/json")
            .body(body);
        if let Some(token) = &self.auth_token {
            req = req.bearer_auth(token);
        }

        req.send().await.map_err(|e| {
            if e.is_timeout() {
                McpError::Timeout {
                    operation: format!("POST {}", self.endpoint),
                    timeout_ms: self.timeout.as_millis() as u64,
                }
            } else {
                self.transport_error(format!("request failed: {e}"))
            }
        })
    }
}

/// Read the event stream until it ends, routing responses to waiters.
async fn read_events(
    server_name: String,
    response: reqwest::Response,
    pending: Pending,
    endpoint_tx: oneshot::Sender<String>,
) {
    let mut endpoint_tx = Some(endpoint_tx);
    let mut parser = EventParser::default();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(server = %server_name, error = %e, "provider event stream failed");
                break;
            }
        };

        for event in parser.feed(&String::from_utf8_lossy(&chunk)) {
            match event.event.as_str() {
                "endpoint" => {
                    if let Some(tx) = endpoint_tx.take() {
                        let _ = tx.send(event.data.trim().to_string());
                    }
                }
                "message" => dispatch(&server_name, &pending, &event.data).await,
                other => tracing::debug!(server = %server_name, event = other, "ignoring provider event"),
            }
        }
    }

    tracing::debug!(server = %server_name, "provider event stream ended");
    // Dropping the senders wakes every waiter with a closed channel.
    pending.lock().await.clear();
}

async fn dispatch(server_name: &str, pending: &Pending, data: &str) {
    let response: JsonRpcResponse = match serde_json::from_str(data) {
        Ok(response) => response,
        Err(e) => {
            tracing::debug!(server = server_name, error = %e, "skipping non-JSON-RPC event");
            return;
        }
    };
    let Some(id) = response.id else {
        tracing::debug!(server = server_name, "skipping provider notification");
        return;
    };
    match pending.lock().await.remove(&id) {
        Some(tx) => {
            let _ = tx.send(response);
        }
        None => tracing::debug!(server = server_name, id, "response for unknown request"),
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        if self.stream_closed() {
            return Err(self.transport_error("event stream is closed".into()));
        }

        let id = next_request_id();
        let body = serde_json::to_string(&JsonRpcRequest::new(id, method, params))
            .map_err(|e| self.transport_error(format!("failed to serialize request: {e}")))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        tracing::debug!(server = %self.server_name, id, method, "sending SSE request");
        let response = match self.post(body).await {
            Ok(response) => response,
            Err(e) => {
                self.pending.lock().await.remove(&id);
                return Err(e);
            }
        };

        let status = response.status();
        if !status.is_success() {
            self.pending.lock().await.remove(&id);
            let text = response.text().await.unwrap_or_default();
            return Err(self.transport_error(format!("provider returned {status}: {text}")));
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(self.transport_error(
                "event stream closed before the response arrived".into(),
            )),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(McpError::Timeout {
                    operation: method.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
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
        if !response.status().is_success() {
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
        let reader = self.reader.lock().ok().and_then(|mut guard| guard.take());
        if let Some(reader) = reader {
            reader.abort();
            tracing::debug!(server = %self.server_name, "provider event stream closed");
        }
        self.pending.lock().await.clear();
        Ok(())
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().ok().and_then(Option::take) {
            reader.abort();
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::transport::extract_result;
    use axum::extract::{Query, State};
    use axum::http::StatusCode;
    use axum::response::sse::{Event, Sse};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use futures::Stream;
    use serde_json::{json, Value};
    use std::convert::Infallible;
    use tokio::sync::mpsc;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Event sender for the single open stream of [`spawn_provider`].
    #[derive(Clone, Default)]
    struct Shared {
        events: Arc<std::sync::Mutex<Option<mpsc::UnboundedSender<String>>>>,
    }

    async fn event_stream(
        State(shared): State<Shared>,
    ) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        *shared.events.lock().unwrap() = Some(tx);

        let endpoint = futures::stream::once(async {
            Ok::<_, Infallible>(Event::default().event("endpoint").data("/messages?sessionId=abc"))
        });
        let messages = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv()
                .await
                .map(|data| (Ok(Event::default().event("message").data(data)), rx))
        });
        Sse::new(endpoint.chain(messages))
    }

    async fn message(
        State(shared): State<Shared>,
        Query(query): Query<HashMap<String, String>>,
        Json(body): Json<Value>,
    ) -> StatusCode {
        if query.get("sessionId").map(String::as_str) != Some("abc") {
            return StatusCode::NOT_FOUND;
        }
        if let Some(id) = body.get("id") {
            let noise = json!({"jsonrpc": "2.0", "method": "notifications/progress"});
            let reply = json!({"jsonrpc": "2.0", "id": id, "result": {"method": body["method"]}});
            if let Some(tx) = shared.events.lock().unwrap().as_ref() {
                let _ = tx.send(noise.to_string());
                let _ = tx.send(reply.to_string());
            }
        }
        StatusCode::ACCEPTED
    }

    /// A legacy SSE provider that echoes the method of every request.
    async fn spawn_provider() -> String {
        let app = Router::new()
            .route("/sse", get(event_stream))
            .route("/messages", post(message))
            .with_state(Shared::default());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}/sse")
    }

    #[test]
    fn test_parser_handles_split_chunks_and_comments() {
        let mut parser = EventParser::default();
        assert!(parser.feed("event: endpoint\nda").is_empty());
        let events = parser.feed("ta: /messages?sessionId=1\n\n: ping\n\ndata: {\"a\":\ndata: 1}\r\n\r\n");
        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: "endpoint".into(),
                    data: "/messages?sessionId=1".into()
                },
                SseEvent {
                    event: "message".into(),
                    data: "{\"a\":\n1}".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_request_round_trip_over_event_stream() {
        let url = spawn_provider().await;
        let transport = SseTransport::connect("test", &url, None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(transport.endpoint.path(), "/messages");

        let resp = transport.request("tools/list", None).await.unwrap();
        assert_eq!(extract_result(resp).unwrap()["method"], "tools/list");
        let resp = transport.request("tools/call", None).await.unwrap();
        assert_eq!(extract_result(resp).unwrap()["method"], "tools/call");

        transport.notify("notifications/initialized", None).await.unwrap();

        transport.close().await.unwrap();
        let err = transport.request("tools/list", None).await.unwrap_err();
        assert!(matches!(err, McpError::TransportError { .. }));
    }

    #[tokio::test]
    async fn test_stream_without_endpoint_event_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw("event: message\ndata: {}\n\n", "text/event-stream"),
            )
            .mount(&server)
            .await;

        let err = SseTransport::connect(
            "test",
            &format!("{}/sse", server.uri()),
            None,
            Duration::from_secs(5),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, McpError::TransportError { .. }));
        assert!(err.to_string().contains("endpoint"));
    }

    #[tokio::test]
    async fn test_error_status_on_connect() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401).set_body_string("no token"))
            .mount(&server)
            .await;

        let err = SseTransport::connect(
            "test",
            &format!("{}/sse", server.uri()),
            Some("bad".into()),
            Duration::from_secs(5),
        )
        .await
        .err()
        .unwrap();
        assert!(err.to_string().contains("401"));
    }
}
