//! AgentLoop — the bounded multi-round dialog for one user turn.
//!
//! State machine:
//!
//! ```text
//! Init ──append user turn──▶ AwaitingModel ──no tool calls──▶ Done
//!                                 │  ▲
//!                     tool calls  │  │ round += 1
//!                                 ▼  │
//!                            ExecutingTools
//! ```
//!
//! At most `max_rounds` backend calls are made per user turn. When the budget
//! is spent while the model still wants tools, the turn ends with the last
//! assistant content seen. Backend failures and timeouts move to `Failed`;
//! turns already committed stay, nothing partial is appended.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::inference::types::{AssistantReply, ChatMessage, ToolDefinition};
use crate::inference::{ChatBackend, InferenceError};
use crate::mcp_client::session::ProviderSession;

use super::catalog::BASE_SYSTEM_PROMPT;
use super::conversation::ConversationStore;
use super::errors::AgentError;
use super::tool_router::ToolRouter;
use super::types::Turn;

// ─── Configuration ──────────────────────────────────────────────────────────

/// Default round budget per user turn.
pub const DEFAULT_MAX_ROUNDS: usize = 5;

fn default_max_rounds() -> usize {
    DEFAULT_MAX_ROUNDS
}
fn default_backend_timeout_secs() -> u64 {
    120
}
fn default_base_prompt() -> String {
    BASE_SYSTEM_PROMPT.to_string()
}

/// Loop settings (`agent` section of the app config).
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    /// Upper bound on one backend call, on top of the HTTP timeout.
    #[serde(default = "default_backend_timeout_secs")]
    pub backend_timeout_secs: u64,
    /// Persona placed before the capability listing in the system turn.
    #[serde(default = "default_base_prompt")]
    pub base_prompt: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            backend_timeout_secs: default_backend_timeout_secs(),
            base_prompt: default_base_prompt(),
        }
    }
}

// ─── State ──────────────────────────────────────────────────────────────────

/// Where the loop is; recorded in structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Init,
    AwaitingModel,
    ExecutingTools,
    Done,
    Failed,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::Init => "init",
            LoopState::AwaitingModel => "awaiting_model",
            LoopState::ExecutingTools => "executing_tools",
            LoopState::Done => "done",
            LoopState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Everything one turn needs from the caller.
pub struct TurnContext<'a> {
    pub session_id: &'a str,
    pub user_message: &'a str,
    pub provider: &'a dyn ProviderSession,
    /// Schema list offered to the model.
    pub tools: &'a [ToolDefinition],
    /// Names of the tools discovered on this connection.
    pub tool_names: Vec<String>,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Final assistant text (possibly empty).
    pub reply: String,
    /// Tool names available during the turn.
    pub tools: Vec<String>,
    /// Backend calls made.
    pub rounds: usize,
    /// Whether the round budget ran out before a final answer.
    pub exhausted: bool,
}

// ─── AgentLoop ──────────────────────────────────────────────────────────────

/// Drives backend rounds and tool execution for one user turn at a time.
pub struct AgentLoop {
    backend: Arc<dyn ChatBackend>,
    router: ToolRouter,
    max_rounds: usize,
    backend_timeout: Duration,
}

impl AgentLoop {
    pub fn new(backend: Arc<dyn ChatBackend>, router: ToolRouter, config: &AgentConfig) -> Self {
        Self {
            backend,
            router,
            max_rounds: config.max_rounds.max(1),
            backend_timeout: Duration::from_secs(config.backend_timeout_secs),
        }
    }

    /// Run one user turn to completion.
    ///
    /// The session's system turn must already be in place.
    pub async fn run(
        &self,
        store: &ConversationStore,
        ctx: TurnContext<'_>,
    ) -> Result<TurnOutcome, AgentError> {
        let session_id = ctx.session_id;
        let mut state = LoopState::Init;
        tracing::debug!(session_id, %state, "turn started");

        store.append(session_id, Turn::user(ctx.user_message))?;

        let mut last_content = String::new();

        for round in 1..=self.max_rounds {
            state = LoopState::AwaitingModel;
            let messages = store.build_chat_messages(session_id);
            tracing::info!(
                session_id,
                round,
                %state,
                messages = messages.len(),
                tools = ctx.tools.len(),
                "calling backend"
            );

            let reply = match self.call_backend(&messages, ctx.tools).await {
                Ok(reply) => reply,
                Err(e) => {
                    state = LoopState::Failed;
                    tracing::warn!(session_id, round, %state, error = %e, "turn failed");
                    return Err(e);
                }
            };

            last_content = reply.content_or_empty().to_string();

            if !reply.wants_tools() {
                store.append(session_id, Turn::assistant(&last_content))?;
                state = LoopState::Done;
                tracing::info!(session_id, rounds = round, %state, "turn complete");
                return Ok(TurnOutcome {
                    reply: last_content,
                    tools: ctx.tool_names,
                    rounds: round,
                    exhausted: false,
                });
            }

            state = LoopState::ExecutingTools;
            let requested: Vec<&str> = reply.tool_calls.iter().map(|c| c.name.as_str()).collect();
            tracing::info!(session_id, round, %state, tools = ?requested, "executing tool calls");

            store.append(
                session_id,
                Turn::assistant_with_calls(&last_content, reply.tool_calls.clone()),
            )?;

            let outcomes = self.router.dispatch_all(ctx.provider, &reply.tool_calls).await;
            let failed = outcomes.iter().filter(|(_, o)| !o.is_success()).count();
            if failed > 0 {
                tracing::warn!(session_id, round, failed, "tool calls failed");
            }
            for (call, outcome) in outcomes {
                store.append(session_id, Turn::tool(&call.id, &outcome.model_text()))?;
            }
        }

        // Budget spent; the last content may predate the final tool results.
        store.append(session_id, Turn::assistant(&last_content))?;
        state = LoopState::Done;
        tracing::warn!(
            session_id,
            rounds = self.max_rounds,
            %state,
            "round budget exhausted, returning last assistant content"
        );

        Ok(TurnOutcome {
            reply: last_content,
            tools: ctx.tool_names,
            rounds: self.max_rounds,
            exhausted: true,
        })
    }

    async fn call_backend(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<AssistantReply, AgentError> {
        match tokio::time::timeout(self.backend_timeout, self.backend.complete(messages, tools)).await
        {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => {
                if e.is_auth_error() {
                    tracing::error!(
                        body = e.error_body().unwrap_or_default(),
                        "backend rejected the API key"
                    );
                }
                Err(AgentError::from(e))
            }
            Err(_) => Err(AgentError::from(InferenceError::Timeout {
                duration_secs: self.backend_timeout.as_secs(),
            })),
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
