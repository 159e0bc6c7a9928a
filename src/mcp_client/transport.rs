//! JSON-RPC transports.
//!
//! [`Transport`] is the seam between the MCP session and the wire. This file
//! holds the trait and the stdio implementation, which talks to a spawned
//! provider process:
//! - Writing JSON-RPC requests to stdin
//! - Reading JSON-RPC responses from stdout
//! - Line-delimited JSON protocol (one JSON object per line)
//!
//! The streamable HTTP implementation lives in [`super::http`].

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use super::errors::McpError;
use super::types::{
    error_codes, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ProviderConfig,
};

// ─── Constants ───────────────────────────────────────────────────────────────

/// Timeout for graceful shutdown before force-killing.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Number of provider stderr lines kept for failure diagnostics.
const STDERR_TAIL_LINES: usize = 20;

// ─── Request ID Generator ────────────────────────────────────────────────────

/// Global monotonic request ID counter.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a unique request ID.
pub fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// A bidirectional JSON-RPC channel to one provider.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for the response with the same id.
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError>;

    /// Send a notification (no response expected).
    async fn notify(&self, method: &str, params: Option<serde_json::Value>)
        -> Result<(), McpError>;

    /// Tear the channel down. Called at most once, by the releaser.
    async fn close(&self) -> Result<(), McpError>;

    /// Extra context for failure messages (e.g. the provider's stderr tail).
    fn diagnostics(&self) -> Option<String> {
        None
    }
}

// ─── StdioTransport ──────────────────────────────────────────────────────────

/// JSON-RPC transport over a spawned provider process's stdio.
///
/// The child is spawned with `kill_on_drop`, so it is reclaimed even if
/// [`Transport::close`] never runs.
pub struct StdioTransport {
    server_name: String,
    writer: Mutex<Option<ChildStdin>>,
    reader: Mutex<BufReader<ChildStdout>>,
    child: Mutex<Option<Child>>,
    stderr_tail: Arc<std::sync::Mutex<VecDeque<String>>>,
}

impl StdioTransport {
    /// Spawn `command entry args...` and wire its stdio.
    pub fn spawn(
        server_name: &str,
        config: &ProviderConfig,
        entry: &Path,
    ) -> Result<Self, McpError> {
        let mut cmd = Command::new(&config.command);
        cmd.arg(entry);
        cmd.args(&config.args);

        for (key, value) in &config.env {
            cmd.env(key, value);
        }
        if let Some(dir) = config.cwd.as_deref() {
            cmd.current_dir(dir);
        }

        // Windows: prevent console window from appearing for child processes
        #[cfg(target_os = "windows")]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x08000000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }

        cmd.stdin(std::process::Stdio::piped());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::SpawnFailed {
            name: server_name.to_string(),
            reason: format!("{} {}: {e}", config.command, entry.display()),
        })?;

        let stdin = child.stdin.take().ok_or(McpError::SpawnFailed {
            name: server_name.to_string(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or(McpError::SpawnFailed {
            name: server_name.to_string(),
            reason: "failed to capture stdout".into(),
        })?;

        let stderr_tail = Arc::new(std::sync::Mutex::new(VecDeque::new()));
        if let Some(stderr) = child.stderr.take() {
            forward_stderr(server_name.to_string(), stderr, Arc::clone(&stderr_tail));
        }

        tracing::info!(
            server = server_name,
            command = %config.command,
            entry = %entry.display(),
            pid = child.id().unwrap_or_default(),
            "provider process spawned"
        );

        Ok(Self {
            server_name: server_name.to_string(),
            writer: Mutex::new(Some(stdin)),
            reader: Mutex::new(BufReader::new(stdout)),
            child: Mutex::new(Some(child)),
            stderr_tail,
        })
    }

    fn transport_error(&self, reason: String) -> McpError {
        McpError::TransportError {
            server: self.server_name.clone(),
            reason,
        }
    }

    async fn write_line(&self, json: &str) -> Result<(), McpError> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| self.transport_error("transport already closed".into()))?;
        writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| self.transport_error(format!("failed to write to stdin: {e}")))?;
        writer
            .write_all(b"\n")
            .await
            .map_err(|e| self.transport_error(format!("failed to write to stdin: {e}")))?;
        writer
            .flush()
            .await
            .map_err(|e| self.transport_error(format!("failed to flush stdin: {e}")))
    }

    /// The last lines the provider wrote to stderr.
    pub fn stderr_tail(&self) -> String {
        match self.stderr_tail.lock() {
            Ok(tail) => tail.iter().cloned().collect::<Vec<_>>().join("\n"),
            Err(poisoned) => poisoned
                .into_inner()
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = next_request_id();
        let req = JsonRpcRequest::new(id, method, params);

        let json = serde_json::to_string(&req)
            .map_err(|e| self.transport_error(format!("failed to serialize request: {e}")))?;

        tracing::debug!(server = %self.server_name, id, method, "sending stdio request");
        self.write_line(&json).await?;

        // Read response lines until we find one with matching id
        let mut line_buf = String::new();
        let mut reader = self.reader.lock().await;

        loop {
            line_buf.clear();
            let bytes_read = reader
                .read_line(&mut line_buf)
                .await
                .map_err(|e| self.transport_error(format!("failed to read from stdout: {e}")))?;

            if bytes_read == 0 {
                return Err(self.transport_error(
                    "provider stdout closed (process may have exited)".into(),
                ));
            }

            let trimmed = line_buf.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                Ok(resp) if resp.id == Some(id) => return Ok(resp),
                // Notifications and stray responses
                Ok(_) => continue,
                // Not JSON-RPC; provider log output on stdout
                Err(_) => {
                    tracing::debug!(server = %self.server_name, line = trimmed, "skipping non-JSON-RPC line");
                    continue;
                }
            }
        }
    }

    async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let notification = JsonRpcNotification::new(method, params);
        let json = serde_json::to_string(&notification).map_err(|e| {
            self.transport_error(format!("failed to serialize notification: {e}"))
        })?;
        self.write_line(&json).await
    }

    async fn close(&self) -> Result<(), McpError> {
        // Closing stdin is the stdio shutdown signal.
        drop(self.writer.lock().await.take());

        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.server_name, %status, "provider process exited");
            }
            _ => {
                tracing::warn!(
                    server = %self.server_name,
                    timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                    "provider did not exit after stdin closed, killing"
                );
                let _ = child.kill().await;
            }
        }
        Ok(())
    }

    fn diagnostics(&self) -> Option<String> {
        let tail = self.stderr_tail();
        if tail.trim().is_empty() {
            None
        } else {
            Some(tail)
        }
    }
}

/// Forward provider stderr to the log, keeping the last few lines.
fn forward_stderr(
    server_name: String,
    stderr: ChildStderr,
    tail: Arc<std::sync::Mutex<VecDeque<String>>>,
) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(server = %server_name, "{line}");
            let mut tail = match tail.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    });
}

// ─── Response Helpers ────────────────────────────────────────────────────────

/// Extract the result from a JSON-RPC response, converting errors to `McpError`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::ServerError {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    response.result.ok_or(McpError::ServerError {
        code: error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
        data: None,
    })
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp_client::types::JsonRpcError;

    fn response(result: Option<serde_json::Value>, error: Option<JsonRpcError>) -> JsonRpcResponse {
        JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: Some(1),
            result,
            error,
        }
    }

    #[test]
    fn test_next_request_id_is_monotonic() {
        let id1 = next_request_id();
        let id2 = next_request_id();
        assert!(id2 > id1);
    }

    #[test]
    fn test_extract_result_success() {
        let resp = response(Some(serde_json::json!({"text": "hello"})), None);
        let result = extract_result(resp).unwrap();
        assert_eq!(result["text"], "hello");
    }

    #[test]
    fn test_extract_result_error() {
        let resp = response(
            None,
            Some(JsonRpcError {
                code: -32601,
                message: "Method not found".into(),
                data: None,
            }),
        );
        let err = extract_result(resp).unwrap_err();
        assert!(err.is_method_not_found());
    }

    #[test]
    fn test_extract_result_missing_both() {
        let err = extract_result(response(None, None)).unwrap_err();
        assert!(matches!(err, McpError::ServerError { .. }));
    }

    #[tokio::test]
    async fn test_spawn_missing_command_fails() {
        let config = ProviderConfig {
            command: "definitely-not-a-real-binary-cass-doctor".into(),
            ..ProviderConfig::default()
        };
        let result = StdioTransport::spawn("test", &config, Path::new("server.py"));
        assert!(matches!(result, Err(McpError::SpawnFailed { .. })));
    }

    /// Round trip against a shell one-liner that echoes a canned response.
    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdio_request_skips_noise_and_matches_id() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("provider.sh");
        std::fs::write(
            &script,
            "read line\n\
             id=$(echo \"$line\" | sed 's/.*\"id\":\\([0-9]*\\).*/\\1/')\n\
             echo 'starting up'\n\
             echo '{\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\"}'\n\
             echo \"{\\\"jsonrpc\\\":\\\"2.0\\\",\\\"id\\\":$id,\\\"result\\\":{\\\"ok\\\":true}}\"\n\
             echo 'boom' >&2\n",
        )
        .unwrap();

        let config = ProviderConfig {
            command: "sh".into(),
            ..ProviderConfig::default()
        };
        let transport = StdioTransport::spawn("test", &config, &script).unwrap();

        let resp = transport.request("ping", None).await.unwrap();
        assert_eq!(extract_result(resp).unwrap()["ok"], true);

        transport.close().await.unwrap();
        // Second close is a no-op.
        transport.close().await.unwrap();
    }
}
