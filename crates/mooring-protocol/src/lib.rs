//! Protocol layer for the mooring MCP client runtime.
//!
//! Pure data and decision types with no I/O:
//!
//! - [`jsonrpc`]: JSON-RPC 2.0 message shapes and standard error codes
//! - [`types`]: MCP handshake, tool, and sampling types
//! - [`error`]: normalized [`error::ClassifiedError`] taxonomy
//! - [`retry`]: the [`retry::RetryPolicy`] backoff/recovery decisions

pub mod error;
pub mod jsonrpc;
pub mod retry;
pub mod types;

pub use error::{ClassifiedError, ErrorCode, Severity};
pub use jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    JsonRpcVersion, RequestId, ResponseId, ResponsePayload,
};
pub use retry::{RecoveryAction, RetryPolicy};
pub use types::methods;
pub use types::{
    CallToolResult, ClientCapabilities, Content, CreateMessageRequest, CreateMessageResult,
    Implementation, IncludeContext, InitializeRequest, InitializeResult, ListToolsResult,
    ModelHint, ModelPreferences, Role, SamplingMessage, ServerCapabilities, TextContent,
    ToolDefinition, PROTOCOL_VERSION,
};
