//! Agent Core — orchestration layer for cass-doctor.
//!
//! Submodules:
//! - `conversation`: In-memory conversation history, keyed by session id
//! - `catalog`: System prompt + tool schema list from discovered capabilities
//! - `tool_router`: Executes model tool calls against the provider session
//! - `agent_loop`: Bounded multi-round dialog for one user turn
//! - `types`: Shared types across the agent core
//! - `errors`: Agent-level error types

pub mod agent_loop;
pub mod catalog;
pub mod conversation;
pub mod errors;
pub mod tool_router;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports for convenience
pub use agent_loop::{AgentConfig, AgentLoop, LoopState, TurnContext, TurnOutcome};
pub use catalog::{build_catalog, CapabilityCatalog, BASE_SYSTEM_PROMPT, RESOURCE_READER_TOOL};
pub use conversation::{ConversationStore, SystemTurnUpdate};
pub use errors::AgentError;
pub use tool_router::{ToolOutcome, ToolRouter};
pub use types::Turn;
