//! Commands exposed over the HTTP surface.
//!
//! Each command is a plain async or sync function over shared state, so the
//! router in [`crate::server`] stays a thin translation layer.

pub mod chat;
pub mod session;

pub use chat::{send_message, ChatReply, ChatRequest, ChatService};
