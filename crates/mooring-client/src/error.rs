//! Client-level errors and their mapping onto the error classifier.

use std::time::Duration;

use mooring_protocol::{ClassifiedError, ErrorCode, JsonRpcError};
use mooring_transport::TransportError;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the connection manager and sampling manager.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
pub enum ClientError {
    /// No descriptor configured under that name
    #[error("unknown server: {0}")]
    UnknownServer(String),

    /// Descriptor exists but is disabled
    #[error("server '{0}' is disabled")]
    ServerDisabled(String),

    /// A live connection already exists under that name
    #[error("server '{0}' is already connected")]
    AlreadyConnected(String),

    /// No live connection under that name
    #[error("server '{0}' is not connected")]
    NotConnected(String),

    /// Descriptor fails validation
    #[error("invalid descriptor for '{server}': {reason}")]
    InvalidDescriptor { server: String, reason: String },

    /// Transport-level failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server returned a JSON-RPC error
    #[error("server error: {0}")]
    Rpc(ClassifiedError),

    /// No response arrived within the per-request timeout
    #[error("request '{method}' timed out after {timeout:?}")]
    Timeout { method: String, timeout: Duration },

    /// The connection went away while a request was pending
    #[error("connection closed while awaiting response")]
    ConnectionClosed,

    /// The initialize exchange failed
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// Sampling request rejected or failed
    #[error("sampling error: {0}")]
    Sampling(String),

    /// Payload could not be serialized or parsed
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ClientError {
    /// Construct from a JSON-RPC error object, keeping the classifier's
    /// view of it.
    pub fn from_rpc(error: &JsonRpcError, server: &str) -> Self {
        Self::Rpc(ClassifiedError::from_jsonrpc(error).with_server(server))
    }

    /// Project this error into the classifier so retry policy can be
    /// applied uniformly.
    pub fn classify(&self) -> ClassifiedError {
        match self {
            Self::Transport(e) => ClassifiedError::from(e),
            Self::Rpc(classified) => classified.clone(),
            Self::Timeout { method, timeout } => ClassifiedError::new(
                ErrorCode::RequestTimeout,
                format!("request '{method}' timed out after {timeout:?}"),
            ),
            Self::ConnectionClosed => {
                ClassifiedError::new(ErrorCode::ConnectionClosed, self.to_string())
            }
            Self::Handshake(reason) => {
                ClassifiedError::new(ErrorCode::ConnectionFailed, reason.clone())
            }
            Self::Sampling(reason) => {
                ClassifiedError::new(ErrorCode::SamplingError, reason.clone())
            }
            Self::Serialization(reason) => {
                ClassifiedError::new(ErrorCode::ParseError, reason.clone())
            }
            Self::UnknownServer(_)
            | Self::ServerDisabled(_)
            | Self::AlreadyConnected(_)
            | Self::NotConnected(_)
            | Self::InvalidDescriptor { .. } => {
                ClassifiedError::new(ErrorCode::InvalidRequest, self.to_string())
            }
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
