//! Inference Client — OpenAI-compatible chat completions client.
//!
//! This module handles all communication with the model backend:
//! - Non-streaming chat completions with a tool schema list
//! - Lenient response parsing into an [`AssistantReply`]
//! - Backend configuration (`backend` section of the app config)
//!
//! The agent loop only sees the [`ChatBackend`] trait, so the backend is
//! interchangeable via config and replaceable by a fake in tests.

pub mod client;
pub mod config;
pub mod errors;
pub mod response;
pub mod types;

// Re-exports for convenience
pub use client::{ChatBackend, InferenceClient};
pub use config::BackendConfig;
pub use errors::InferenceError;
pub use types::{AssistantReply, ChatMessage, Role, ToolCallRequest, ToolDefinition};
