//! MCP message types: handshake, capabilities, tools, and sampling.
//!
//! Field names follow the wire protocol (camelCase) via serde renames; the
//! Rust structs stay snake_case.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Protocol revision this client negotiates.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// Method names used by the client runtime.
pub mod methods {
    /// Handshake request
    pub const INITIALIZE: &str = "initialize";
    /// Handshake completion notification
    pub const INITIALIZED: &str = "notifications/initialized";
    /// Heartbeat
    pub const PING: &str = "ping";
    /// Tool discovery
    pub const TOOLS_LIST: &str = "tools/list";
    /// Tool invocation
    pub const TOOLS_CALL: &str = "tools/call";
    /// Reverse RPC: server asks the client for an LLM completion
    pub const SAMPLING_CREATE_MESSAGE: &str = "sampling/createMessage";
}

/// Name and version of a protocol participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Implementation name
    pub name: String,
    /// Implementation version
    pub version: String,
}

/// Capabilities declared by the client during `initialize`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Support for sampling (reverse RPC completions)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<HashMap<String, Value>>,
    /// Experimental capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, Value>>,
}

impl ClientCapabilities {
    /// Capabilities advertising sampling support.
    pub fn with_sampling() -> Self {
        Self {
            sampling: Some(HashMap::new()),
            experimental: None,
        }
    }
}

/// Capabilities a server reports back from `initialize`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Support for tools
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<HashMap<String, Value>>,
    /// Support for resources
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<HashMap<String, Value>>,
    /// Support for prompts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompts: Option<HashMap<String, Value>>,
    /// Support for logging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<HashMap<String, Value>>,
    /// Experimental capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, Value>>,
}

impl ServerCapabilities {
    /// Whether the server declared tool support.
    pub fn supports_tools(&self) -> bool {
        self.tools.is_some()
    }

    /// Whether the server declared resource support.
    pub fn supports_resources(&self) -> bool {
        self.resources.is_some()
    }

    /// Whether the server declared prompt support.
    pub fn supports_prompts(&self) -> bool {
        self.prompts.is_some()
    }
}

/// `initialize` request parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeRequest {
    /// Requested protocol version
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Capabilities the client declares
    pub capabilities: ClientCapabilities,
    /// Client identity
    #[serde(rename = "clientInfo")]
    pub client_info: Implementation,
}

/// `initialize` response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitializeResult {
    /// Negotiated protocol version
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Capabilities the server declares
    pub capabilities: ServerCapabilities,
    /// Server identity
    #[serde(rename = "serverInfo")]
    pub server_info: Implementation,
    /// Optional usage instructions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Message author role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Human or host side of the conversation
    User,
    /// Model side of the conversation
    Assistant,
}

/// Text content block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextContent {
    /// The text body
    pub text: String,
}

/// Message content. Only text is modeled; other block kinds pass through
/// as raw values so unknown content never fails deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Content {
    /// Plain text
    #[serde(rename = "text")]
    Text(TextContent),
    /// Any other content block, carried opaquely
    #[serde(untagged)]
    Other(Value),
}

impl Content {
    /// Text content from a string.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(TextContent { text: text.into() })
    }

    /// The text body, if this is a text block.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(t) => Some(&t.text),
            Self::Other(_) => None,
        }
    }

    /// Whether the block carries no usable content.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(t) => t.text.is_empty(),
            Self::Other(v) => v.is_null(),
        }
    }
}

/// One message in a sampling conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingMessage {
    /// Message role
    pub role: Role,
    /// Message content
    pub content: Content,
}

impl SamplingMessage {
    /// A user message with text content.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Content::text(text),
        }
    }

    /// An assistant message with text content.
    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::text(text),
        }
    }
}

/// Hint for model selection, matched as a substring of model names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelHint {
    /// Name pattern
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Model selection preferences. Priorities range over [0.0, 1.0].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelPreferences {
    /// Hints for selecting a model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hints: Option<Vec<ModelHint>>,
    /// Cost preference
    #[serde(rename = "costPriority", skip_serializing_if = "Option::is_none")]
    pub cost_priority: Option<f64>,
    /// Speed preference
    #[serde(rename = "speedPriority", skip_serializing_if = "Option::is_none")]
    pub speed_priority: Option<f64>,
    /// Intelligence preference
    #[serde(
        rename = "intelligencePriority",
        skip_serializing_if = "Option::is_none"
    )]
    pub intelligence_priority: Option<f64>,
}

/// Context inclusion mode for sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncludeContext {
    /// Do not include additional context
    #[serde(rename = "none")]
    None,
    /// Include context only from the requesting server
    #[serde(rename = "thisServer")]
    ThisServer,
    /// Include context from all connected servers
    #[serde(rename = "allServers")]
    AllServers,
}

/// `sampling/createMessage` request parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMessageRequest {
    /// Conversation messages
    pub messages: Vec<SamplingMessage>,
    /// Maximum tokens to sample
    #[serde(rename = "maxTokens")]
    pub max_tokens: u32,
    /// Optional system prompt
    #[serde(rename = "systemPrompt", skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Model selection preferences
    #[serde(rename = "modelPreferences", skip_serializing_if = "Option::is_none")]
    pub model_preferences: Option<ModelPreferences>,
    /// Context inclusion preference
    #[serde(rename = "includeContext", skip_serializing_if = "Option::is_none")]
    pub include_context: Option<IncludeContext>,
    /// Stop sequences
    #[serde(rename = "stopSequences", skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
}

/// `sampling/createMessage` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateMessageResult {
    /// Role of the generated message, always assistant
    pub role: Role,
    /// The sampled content
    pub content: Content,
    /// Name of the model that generated the message
    pub model: String,
    /// Why sampling stopped, if known
    #[serde(rename = "stopReason", skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

/// A tool a server exposes through `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name, unique per server
    pub name: String,
    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema for the tool's arguments
    #[serde(rename = "inputSchema", skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// `tools/list` result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListToolsResult {
    /// Available tools
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

/// `tools/call` result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallToolResult {
    /// Result content blocks
    #[serde(default)]
    pub content: Vec<Content>,
    /// Whether the tool reported an error
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn initialize_request_wire_shape() {
        let request = InitializeRequest {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::with_sampling(),
            client_info: Implementation {
                name: "mooring".to_string(),
                version: "0.4.2".to_string(),
            },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["protocolVersion"], PROTOCOL_VERSION);
        assert!(value["capabilities"]["sampling"].is_object());
        assert_eq!(value["clientInfo"]["name"], "mooring");
    }

    #[test]
    fn server_capabilities_flags() {
        let result: InitializeResult = serde_json::from_value(json!({
            "protocolVersion": "2025-06-18",
            "capabilities": {"tools": {}, "resources": {"subscribe": true}},
            "serverInfo": {"name": "mock", "version": "1.0.0"}
        }))
        .unwrap();
        assert!(result.capabilities.supports_tools());
        assert!(result.capabilities.supports_resources());
        assert!(!result.capabilities.supports_prompts());
    }

    #[test]
    fn sampling_request_round_trip() {
        let request = CreateMessageRequest {
            messages: vec![SamplingMessage::user("hello")],
            max_tokens: 256,
            system_prompt: Some("be brief".to_string()),
            temperature: Some(0.2),
            model_preferences: Some(ModelPreferences {
                hints: Some(vec![ModelHint {
                    name: Some("sonnet".to_string()),
                }]),
                cost_priority: Some(0.5),
                ..Default::default()
            }),
            include_context: Some(IncludeContext::ThisServer),
            stop_sequences: None,
        };
        let wire = serde_json::to_string(&request).unwrap();
        assert!(wire.contains("\"maxTokens\":256"));
        assert!(wire.contains("\"includeContext\":\"thisServer\""));
        let parsed: CreateMessageRequest = serde_json::from_str(&wire).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    fn content_text_accessors() {
        let text = Content::text("result");
        assert_eq!(text.as_text(), Some("result"));
        assert!(!text.is_empty());
        assert!(Content::text("").is_empty());
    }

    #[test]
    fn unknown_content_block_is_preserved() {
        let parsed: Content =
            serde_json::from_value(json!({"type": "image", "data": "...", "mimeType": "image/png"}))
                .unwrap();
        assert!(matches!(parsed, Content::Other(_)));
        assert!(parsed.as_text().is_none());
    }

    #[test]
    fn empty_tool_list_parses() {
        let result: ListToolsResult = serde_json::from_value(json!({"tools": []})).unwrap();
        assert!(result.tools.is_empty());
    }
}
