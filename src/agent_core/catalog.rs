//! Capability catalog — system prompt and tool schema list built from what
//! the provider advertised on this connection.
//!
//! Output is a pure function of its inputs: identical descriptor lists give
//! byte-identical prompt text, which is what lets the conversation store
//! skip rewriting an unchanged system turn.

use serde_json::{json, Value};

use crate::inference::types::ToolDefinition;
use crate::mcp_client::types::{ResourceDescriptor, ToolDescriptor};

/// Name of the built-in tool that reads a provider resource.
pub const RESOURCE_READER_TOOL: &str = "mcp_read_resource";

/// Default persona and ground rules, placed before the capability listing.
pub const BASE_SYSTEM_PROMPT: &str = "You are Cassandra Doctor — an expert SRE/DBA assistant for Apache Cassandra clusters.

IMPORTANT: Always use the available MCP tools to answer questions. The tools and their schemas are provided to you dynamically.

ALWAYS call the appropriate tool(s) first before providing an answer. If you don't have the data, use the tools to get it.

Be concise and specific. Warn before any disruptive actions. Return clear steps and brief rationale.
";

const CLOSING_INSTRUCTION: &str = "Use the tools and resources above to answer questions. \
Always call the appropriate tool first to get data before responding.";

const NO_DESCRIPTION: &str = "No description";

/// The per-request view of the provider's capabilities.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityCatalog {
    /// Text for the session's system turn.
    pub system_prompt: String,
    /// Function schemas offered to the model; the resource reader is last.
    pub tools: Vec<ToolDefinition>,
}

/// Build the catalog from freshly discovered descriptors.
pub fn build_catalog(
    base_prompt: &str,
    tools: &[ToolDescriptor],
    resources: &[ResourceDescriptor],
) -> CapabilityCatalog {
    CapabilityCatalog {
        system_prompt: render_prompt(base_prompt, tools, resources),
        tools: tool_definitions(tools),
    }
}

fn render_prompt(
    base_prompt: &str,
    tools: &[ToolDescriptor],
    resources: &[ResourceDescriptor],
) -> String {
    let mut prompt = format!("{base_prompt}\n\n");

    if !tools.is_empty() {
        prompt.push_str("AVAILABLE TOOLS:\n");
        for tool in tools {
            prompt.push_str(&format!(
                "- {}: {}\n",
                tool.name,
                description_or_default(tool.description.as_deref())
            ));
            match tool.schema() {
                Some(schema) => {
                    prompt.push_str(&format!("  Parameters: {}\n", pretty(schema)));
                }
                None => {
                    prompt.push_str(&format!(
                        "  Available attributes: {:?}\n",
                        tool.attribute_names()
                    ));
                }
            }
        }
        prompt.push('\n');
    }

    if !resources.is_empty() {
        prompt.push_str("AVAILABLE RESOURCES:\n");
        for resource in resources {
            prompt.push_str(&format!(
                "- {}: {}\n",
                resource.uri,
                description_or_default(resource.description.as_deref())
            ));
        }
        prompt.push('\n');
    }

    prompt.push_str(CLOSING_INSTRUCTION);
    prompt
}

fn description_or_default(description: Option<&str>) -> &str {
    description.filter(|d| !d.is_empty()).unwrap_or(NO_DESCRIPTION)
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// One function definition per tool, then the resource reader.
fn tool_definitions(tools: &[ToolDescriptor]) -> Vec<ToolDefinition> {
    tools
        .iter()
        .map(|tool| {
            let parameters = tool
                .schema()
                .cloned()
                .unwrap_or_else(|| json!({"type": "object", "properties": {}}));
            ToolDefinition::function(
                &tool.name,
                tool.description.as_deref().unwrap_or_default(),
                parameters,
            )
        })
        .chain(std::iter::once(resource_reader_definition()))
        .collect()
}

/// The built-in `mcp_read_resource` schema.
pub fn resource_reader_definition() -> ToolDefinition {
    ToolDefinition::function(
        RESOURCE_READER_TOOL,
        "Read a resource by URI exposed by the MCP server.",
        json!({
            "type": "object",
            "properties": {"uri": {"type": "string"}},
            "required": ["uri"],
            "additionalProperties": false
        }),
    )
}

// ─── Tests ──────────────────────────────────────────────────────────────────
