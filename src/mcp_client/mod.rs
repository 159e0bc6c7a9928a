//! MCP Client — JSON-RPC connection to the capability provider.
//!
//! This module handles:
//! - Choosing between a network endpoint and a spawned provider process
//! - JSON-RPC 2.0 over process stdio, streamable HTTP, or legacy HTTP+SSE
//! - The `initialize` handshake and capability discovery
//! - Tool invocation and resource reads, each bounded by a timeout
//! - Releasing the connection exactly once per request
//!
//! Sessions are opened per inbound request and never shared.

pub mod errors;
pub mod http;
pub mod lifecycle;
pub mod session;
pub mod sse;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use errors::McpError;
pub use lifecycle::{open, select_transport, Connector, McpConnector, Releaser, TransportPlan};
pub use session::{McpSession, ProviderSession};
pub use transport::Transport;
pub use types::{
    ContentItem, Discovery, NetworkTransport, ProviderConfig, ProviderResult, ResourceDescriptor, ToolDescriptor,
};
