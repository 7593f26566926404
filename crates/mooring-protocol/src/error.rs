//! Normalized error taxonomy.
//!
//! Every failure the runtime sees, wire error, transport I/O failure, or
//! internal fault, is folded into a [`ClassifiedError`] so recovery decisions
//! are made in one place. Recoverability and retryability derive from the
//! [`ErrorCode`] at construction and never change afterwards.

use crate::jsonrpc::JsonRpcError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Classification code covering JSON-RPC standard errors and the
/// protocol-level failure modes the runtime itself produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Malformed JSON on the wire (-32700)
    ParseError,
    /// Structurally invalid request (-32600)
    InvalidRequest,
    /// Unknown method (-32601)
    MethodNotFound,
    /// Bad parameters (-32602)
    InvalidParams,
    /// Server internal error (-32603)
    InternalError,
    /// Server-defined error in the -32000..=-32099 range
    ServerError,
    /// Transport could not be opened
    ConnectionFailed,
    /// Connection attempt exceeded its deadline
    ConnectionTimeout,
    /// Established connection was lost or closed
    ConnectionClosed,
    /// A request waited out its timeout
    RequestTimeout,
    /// Server asked us to slow down
    RateLimited,
    /// Credentials rejected
    AuthenticationFailed,
    /// Operation not permitted for this client
    PermissionDenied,
    /// Client and server protocol revisions are incompatible
    VersionMismatch,
    /// Named tool does not exist on the server
    ToolNotFound,
    /// Named resource does not exist on the server
    ResourceNotFound,
    /// Sampling subsystem rejected or failed the request
    SamplingError,
    /// Anything that fits nowhere else
    Unknown,
}

impl ErrorCode {
    /// Map a JSON-RPC error code to a classification code.
    pub fn from_jsonrpc_code(code: i32) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            -32099..=-32000 => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Whether the connection can survive this error. Wire and capability
    /// errors are fatal to the offending call only; connection-class errors
    /// are survivable through reconnection.
    pub fn is_recoverable(self) -> bool {
        match self {
            Self::ParseError
            | Self::InvalidRequest
            | Self::MethodNotFound
            | Self::InvalidParams
            | Self::AuthenticationFailed
            | Self::PermissionDenied
            | Self::VersionMismatch
            | Self::ToolNotFound
            | Self::ResourceNotFound => false,
            Self::InternalError
            | Self::ServerError
            | Self::ConnectionFailed
            | Self::ConnectionTimeout
            | Self::ConnectionClosed
            | Self::RequestTimeout
            | Self::RateLimited
            | Self::SamplingError
            | Self::Unknown => true,
        }
    }

    /// Whether re-issuing the same operation can plausibly succeed.
    pub fn is_retryable(self) -> bool {
        match self {
            Self::InternalError
            | Self::ServerError
            | Self::ConnectionFailed
            | Self::ConnectionTimeout
            | Self::ConnectionClosed
            | Self::RequestTimeout
            | Self::RateLimited => true,
            Self::ParseError
            | Self::InvalidRequest
            | Self::MethodNotFound
            | Self::InvalidParams
            | Self::AuthenticationFailed
            | Self::PermissionDenied
            | Self::VersionMismatch
            | Self::ToolNotFound
            | Self::ResourceNotFound
            | Self::SamplingError
            | Self::Unknown => false,
        }
    }

    /// Whether this is a connection-class failure, answered by
    /// reconnecting rather than re-sending.
    pub fn is_connection_error(self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed | Self::ConnectionTimeout | Self::ConnectionClosed
        )
    }

    /// Default severity for this code.
    pub fn severity(self) -> Severity {
        match self {
            Self::MethodNotFound | Self::ToolNotFound | Self::ResourceNotFound => Severity::Low,
            Self::ParseError
            | Self::InvalidRequest
            | Self::InvalidParams
            | Self::RequestTimeout
            | Self::RateLimited
            | Self::SamplingError
            | Self::Unknown => Severity::Medium,
            Self::InternalError
            | Self::ServerError
            | Self::ConnectionFailed
            | Self::ConnectionTimeout
            | Self::ConnectionClosed => Severity::High,
            Self::AuthenticationFailed | Self::PermissionDenied | Self::VersionMismatch => {
                Severity::Critical
            }
        }
    }
}

/// How serious a classified error is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Expected noise, a specific call failed
    Low,
    /// A call failed in a way worth noticing
    Medium,
    /// The connection is in trouble
    High,
    /// The connection cannot be salvaged without operator action
    Critical,
}

/// A normalized error, independent of where it originated.
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    /// Classification code
    pub code: ErrorCode,
    /// Human-readable description
    pub message: String,
    /// Server the error belongs to, if known
    pub server: Option<String>,
    /// Severity derived from the code
    pub severity: Severity,
    /// Whether the connection can survive this error
    pub recoverable: bool,
    /// Whether the operation may be re-issued
    pub retryable: bool,
    /// Server-directed backoff, for rate limiting
    pub retry_after: Option<Duration>,
    /// When the error was classified
    pub timestamp: DateTime<Utc>,
    /// Underlying cause, if any
    pub cause: Option<String>,
}

impl ClassifiedError {
    /// Classify an error. Recoverable/retryable/severity derive from the
    /// code here and are immutable afterwards.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            server: None,
            severity: code.severity(),
            recoverable: code.is_recoverable(),
            retryable: code.is_retryable(),
            retry_after: None,
            timestamp: Utc::now(),
            cause: None,
        }
    }

    /// Attach the owning server name.
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    /// Attach the underlying cause.
    pub fn with_cause(mut self, cause: impl fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }

    /// Attach a server-supplied retry-after delay.
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// Classify a JSON-RPC error object from the wire. A `retryAfter`
    /// field in the error data (seconds) is honored for rate limiting.
    pub fn from_jsonrpc(error: &JsonRpcError) -> Self {
        let code = ErrorCode::from_jsonrpc_code(error.code);
        let mut classified = Self::new(code, error.message.clone());
        if let Some(data) = &error.data {
            if let Some(secs) = data.get("retryAfter").and_then(serde_json::Value::as_u64) {
                classified.retry_after = Some(Duration::from_secs(secs));
            }
        }
        classified
    }

    /// Whether this is a connection-class failure.
    pub fn is_connection_error(&self) -> bool {
        self.code.is_connection_error()
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)?;
        if let Some(server) = &self.server {
            write!(f, " (server: {server})")?;
        }
        if let Some(cause) = &self.cause {
            write!(f, " (caused by: {cause})")?;
        }
        Ok(())
    }
}

impl std::error::Error for ClassifiedError {}
