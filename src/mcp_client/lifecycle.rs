//! Provider connection lifecycle.
//!
//! Decides how to reach the provider, opens a transport, performs the
//! handshake, and hands back the session together with a [`Releaser`] that
//! tears the connection down exactly once.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::errors::McpError;
use super::http::HttpTransport;
use super::session::{McpSession, ProviderSession};
use super::sse::SseTransport;
use super::transport::{StdioTransport, Transport};
use super::types::{NetworkTransport, ProviderConfig};

/// Name used for the provider in logs and errors.
pub const PROVIDER_NAME: &str = "cassandra";

// ─── Transport selection ─────────────────────────────────────────────────────

/// How the provider will be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportPlan {
    /// Streamable HTTP to this endpoint.
    Network(String),
    /// Legacy HTTP+SSE: event stream at this URL.
    Sse(String),
    /// Spawn `command entry` and speak over stdio.
    Spawn { command: String, entry: PathBuf },
}

/// Pick the transport from configuration.
///
/// A configured endpoint wins; otherwise the spawn target must exist. Only
/// the existence check touches the filesystem.
///
/// For an endpoint, `provider.transport` picks the protocol; `auto` means
/// legacy SSE when the URL path ends in `/sse`.
pub fn select_transport(config: &ProviderConfig) -> Result<TransportPlan, McpError> {
    if let Some(url) = config.endpoint() {
        let parsed = reqwest::Url::parse(url).map_err(|e| McpError::ConfigError {
            reason: format!("invalid provider url '{url}': {e}"),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(McpError::ConfigError {
                reason: format!("provider url must be http(s): '{url}'"),
            });
        }
        let legacy_sse = match config.transport {
            NetworkTransport::Sse => true,
            NetworkTransport::Http => false,
            NetworkTransport::Auto => parsed.path().trim_end_matches('/').ends_with("/sse"),
        };
        return Ok(if legacy_sse {
            TransportPlan::Sse(url.to_string())
        } else {
            TransportPlan::Network(url.to_string())
        });
    }

    let entry = resolve_entry(config);
    if entry.exists() {
        return Ok(TransportPlan::Spawn {
            command: config.command.clone(),
            entry,
        });
    }

    Err(McpError::ConfigError {
        reason: format!(
            "no provider url configured and spawn target '{}' not found",
            entry.display()
        ),
    })
}

/// `entry` resolved against the configured working directory, then made
/// absolute. The child runs inside `cwd`, so a relative path would be
/// resolved a second time there.
fn resolve_entry(config: &ProviderConfig) -> PathBuf {
    let entry = Path::new(&config.entry);
    let joined = match config.cwd.as_deref() {
        Some(dir) if entry.is_relative() => Path::new(dir).join(entry),
        _ => entry.to_path_buf(),
    };
    if joined.is_absolute() {
        return joined;
    }
    match std::env::current_dir() {
        Ok(base) => base.join(joined),
        Err(_) => joined,
    }
}

// ─── Releaser ────────────────────────────────────────────────────────────────

/// Closes a provider transport. Consumed by [`Releaser::release`], so the
/// close happens at most once.
pub struct Releaser {
    name: String,
    transport: Option<Arc<dyn Transport>>,
}

impl Releaser {
    pub fn new(name: &str, transport: Arc<dyn Transport>) -> Self {
        Self {
            name: name.to_string(),
            transport: Some(transport),
        }
    }

    /// Close the transport. Failures are logged, never returned.
    pub async fn release(mut self) {
        if let Some(transport) = self.transport.take() {
            match transport.close().await {
                Ok(()) => tracing::debug!(server = %self.name, "provider session released"),
                Err(e) => tracing::warn!(server = %self.name, error = %e, "provider close failed"),
            }
        }
    }
}

impl Drop for Releaser {
    fn drop(&mut self) {
        if self.transport.is_some() {
            // A spawned child is still reclaimed through kill_on_drop.
            tracing::warn!(server = %self.name, "provider session dropped without release");
        }
    }
}

// ─── Opening ─────────────────────────────────────────────────────────────────

/// Open a session: select transport, connect, handshake.
///
/// On handshake failure the transport is closed before the error is
/// returned; stdio failures carry the provider's stderr tail.
pub async fn open(config: &ProviderConfig) -> Result<(McpSession, Releaser), McpError> {
    let plan = select_transport(config)?;
    let call_timeout = Duration::from_secs(config.call_timeout_secs);
    let init_timeout = Duration::from_secs(config.init_timeout_secs);

    let transport: Arc<dyn Transport> = match &plan {
        TransportPlan::Network(url) => {
            tracing::debug!(server = PROVIDER_NAME, url = %url, "connecting over HTTP");
            Arc::new(HttpTransport::new(
                PROVIDER_NAME,
                url,
                config.auth_token.clone(),
                call_timeout.max(init_timeout),
            )?)
        }
        TransportPlan::Sse(url) => {
            tracing::debug!(server = PROVIDER_NAME, url = %url, "connecting over SSE");
            Arc::new(
                SseTransport::connect(
                    PROVIDER_NAME,
                    url,
                    config.auth_token.clone(),
                    call_timeout.max(init_timeout),
                )
                .await?,
            )
        }
        TransportPlan::Spawn { entry, .. } => {
            Arc::new(StdioTransport::spawn(PROVIDER_NAME, config, entry)?)
        }
    };

    let session = McpSession::new(PROVIDER_NAME, Arc::clone(&transport), call_timeout);

    let failure = match tokio::time::timeout(init_timeout, session.initialize()).await {
        Ok(Ok(_)) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(_) => Some(format!(
            "initialization timed out after {}s",
            init_timeout.as_secs()
        )),
    };

    if let Some(reason) = failure {
        let reason = match transport.diagnostics() {
            Some(stderr) => format!("{reason} | stderr: {}", stderr.trim()),
            None => reason,
        };
        Releaser::new(PROVIDER_NAME, transport).release().await;
        tracing::warn!(server = PROVIDER_NAME, reason = %reason, "provider handshake failed");
        return Err(McpError::InitFailed {
            name: PROVIDER_NAME.to_string(),
            reason,
        });
    }

    Ok((session, Releaser::new(PROVIDER_NAME, transport)))
}

// ─── Connector ───────────────────────────────────────────────────────────────

/// Opens provider sessions for the chat command.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<(Box<dyn ProviderSession>, Releaser), McpError>;

    /// Human-readable transport choice for the startup banner.
    fn describe(&self) -> String;
}

/// [`Connector`] backed by the configured MCP provider.
pub struct McpConnector {
    config: ProviderConfig,
}

impl McpConnector {
    pub fn new(config: ProviderConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for McpConnector {
    async fn connect(&self) -> Result<(Box<dyn ProviderSession>, Releaser), McpError> {
        let (session, releaser) = open(&self.config).await?;
        Ok((Box::new(session), releaser))
    }

    fn describe(&self) -> String {
        match select_transport(&self.config) {
            Ok(TransportPlan::Network(url)) => format!("http {url}"),
            Ok(TransportPlan::Sse(url)) => format!("sse {url}"),
            Ok(TransportPlan::Spawn { command, entry }) => {
                format!("stdio {command} {}", entry.display())
            }
            Err(e) => format!("unavailable ({e})"),
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
