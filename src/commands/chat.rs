//! Chat command: one inbound user message in, one assistant reply out.
//!
//! Each call opens its own provider session, rediscovers capabilities,
//! refreshes the system turn, runs the agent loop, and releases the session
//! on every exit path after the connection was made.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent_core::{
    build_catalog, AgentError, AgentLoop, ConversationStore, TurnContext, TurnOutcome,
};
use crate::mcp_client::lifecycle::Connector;
use crate::mcp_client::session::ProviderSession;

/// Session used when the request does not name one.
pub const DEFAULT_SESSION_ID: &str = "default";

// ─── Request / Response Types ───────────────────────────────────────────────

/// Inbound chat request.
///
/// Missing or `null` fields are accepted here; a missing message is rejected
/// as empty by [`send_message`], a missing session id falls back to
/// [`DEFAULT_SESSION_ID`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl ChatRequest {
    pub fn new(message: &str, session_id: &str) -> Self {
        Self {
            message: Some(message.to_string()),
            session_id: Some(session_id.to_string()),
        }
    }
}

/// Successful chat response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatReply {
    pub reply: String,
    /// Tools the provider offered during this turn.
    pub tools: Vec<String>,
}

impl From<TurnOutcome> for ChatReply {
    fn from(outcome: TurnOutcome) -> Self {
        Self {
            reply: outcome.reply,
            tools: outcome.tools,
        }
    }
}

// ─── ChatService ────────────────────────────────────────────────────────────

/// Everything a chat turn needs, shared across requests.
pub struct ChatService {
    store: Arc<ConversationStore>,
    agent: AgentLoop,
    connector: Arc<dyn Connector>,
    base_prompt: String,
    has_credentials: bool,
}

impl ChatService {
    pub fn new(
        store: Arc<ConversationStore>,
        agent: AgentLoop,
        connector: Arc<dyn Connector>,
        base_prompt: &str,
        has_credentials: bool,
    ) -> Self {
        Self {
            store,
            agent,
            connector,
            base_prompt: base_prompt.to_string(),
            has_credentials,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn connector(&self) -> &dyn Connector {
        self.connector.as_ref()
    }
}

// ─── Commands ───────────────────────────────────────────────────────────────

/// Handle one user message.
///
/// Rejects blank messages and missing backend credentials before touching
/// the provider or the session.
pub async fn send_message(
    service: &ChatService,
    request: ChatRequest,
) -> Result<ChatReply, AgentError> {
    let message = request.message.as_deref().unwrap_or_default().trim();
    if message.is_empty() {
        return Err(AgentError::InvalidRequest {
            reason: "message must not be empty".into(),
        });
    }
    if !service.has_credentials {
        return Err(AgentError::Configuration {
            reason: "backend API key is not configured".into(),
        });
    }

    let session_id = request
        .session_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or(DEFAULT_SESSION_ID);

    let (provider, releaser) = service.connector.connect().await.map_err(|e| {
        tracing::warn!(session_id, error = %e, "provider connection failed");
        AgentError::from(e)
    })?;

    let result = run_turn(service, provider.as_ref(), session_id, message).await;
    releaser.release().await;

    let outcome = result?;
    tracing::info!(
        session_id,
        rounds = outcome.rounds,
        exhausted = outcome.exhausted,
        reply_len = outcome.reply.len(),
        "chat turn finished"
    );
    Ok(outcome.into())
}

async fn run_turn(
    service: &ChatService,
    provider: &dyn ProviderSession,
    session_id: &str,
    message: &str,
) -> Result<TurnOutcome, AgentError> {
    let discovery = provider.discover().await?;
    tracing::info!(
        session_id,
        tools = discovery.tools.len(),
        resources = discovery.resources.len(),
        "capabilities discovered"
    );

    let catalog = build_catalog(&service.base_prompt, &discovery.tools, &discovery.resources);
    let update = service
        .store
        .ensure_system_turn(session_id, &catalog.system_prompt, false);
    tracing::debug!(session_id, ?update, "system turn ensured");

    let ctx = TurnContext {
        session_id,
        user_message: message,
        provider,
        tools: &catalog.tools,
        tool_names: discovery.tools.iter().map(|t| t.name.clone()).collect(),
    };
    service.agent.run(&service.store, ctx).await
}

// ─── Tests ──────────────────────────────────────────────────────────────────
