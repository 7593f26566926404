//! Transport error types.

use mooring_protocol::{ClassifiedError, ErrorCode};
use thiserror::Error;

/// A specialized `Result` for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Errors produced by transport operations.
#[derive(Error, Debug, Clone)]
#[non_exhaustive]
pub enum TransportError {
    /// Failed to establish a connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// An established connection was lost.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Failed to send a message.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive a message.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Failed to serialize or deserialize a message.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// A protocol-level error occurred.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The operation did not complete within its timeout.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// The transport was used while not connected.
    #[error("Not connected")]
    NotConnected,

    /// The transport was configured or used incorrectly.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// An underlying I/O error occurred.
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationFailed(err.to_string())
    }
}

impl From<&TransportError> for ClassifiedError {
    fn from(err: &TransportError) -> Self {
        let code = match err {
            TransportError::ConnectionFailed(_) => ErrorCode::ConnectionFailed,
            TransportError::ConnectionLost(_) | TransportError::NotConnected => {
                ErrorCode::ConnectionClosed
            }
            TransportError::SendFailed(_) | TransportError::ReceiveFailed(_) => {
                ErrorCode::ConnectionClosed
            }
            TransportError::SerializationFailed(_) => ErrorCode::ParseError,
            TransportError::ProtocolError(_) => ErrorCode::InvalidRequest,
            TransportError::Timeout(_) => ErrorCode::ConnectionTimeout,
            TransportError::ConfigurationError(_) | TransportError::Io(_) => ErrorCode::Unknown,
        };
        ClassifiedError::new(code, err.to_string())
    }
}

impl From<TransportError> for ClassifiedError {
    fn from(err: TransportError) -> Self {
        Self::from(&err)
    }
}
