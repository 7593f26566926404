//! Core transport contract and shared types.

use async_trait::async_trait;
use bytes::Bytes;
use mooring_protocol::JsonRpcNotification;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::error::TransportResult;

/// The kind of channel a transport runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Child process stdio
    Subprocess,
    /// HTTP request/response
    Http,
    /// Server-Sent Events over HTTP
    Sse,
    /// WebSocket full duplex
    WebSocket,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subprocess => write!(f, "subprocess"),
            Self::Http => write!(f, "http"),
            Self::Sse => write!(f, "sse"),
            Self::WebSocket => write!(f, "websocket"),
        }
    }
}

/// Lifecycle state of a transport.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TransportState {
    /// Not connected
    #[default]
    Disconnected,
    /// Connection in progress
    Connecting,
    /// Ready for traffic
    Connected,
    /// Shutdown in progress
    Disconnecting,
    /// Terminally failed
    Failed {
        /// What went wrong
        reason: String,
    },
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnecting => write!(f, "disconnecting"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
        }
    }
}

/// A single frame moving through a transport. The payload is one complete
/// JSON-RPC message; the optional tag marks the frame for replay after a
/// WebSocket reconnect.
#[derive(Debug, Clone)]
pub struct TransportMessage {
    /// Replay tag, present on frames eligible for resend
    pub tag: Option<Uuid>,
    /// Serialized JSON-RPC message, no trailing newline
    pub payload: Bytes,
}

impl TransportMessage {
    /// An untagged frame.
    pub fn new(payload: Bytes) -> Self {
        Self { tag: None, payload }
    }

    /// A frame tagged with a fresh UUID for replay tracking.
    pub fn tagged(payload: Bytes) -> Self {
        Self {
            tag: Some(Uuid::new_v4()),
            payload,
        }
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// The uniform contract every transport honors. The connection layer stays
/// transport-agnostic by speaking only through this trait.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// The kind of this transport.
    fn kind(&self) -> TransportKind;

    /// The endpoint this transport talks to, for diagnostics.
    fn endpoint(&self) -> String;

    /// Current lifecycle state.
    fn state(&self) -> TransportState;

    /// Open the channel. Fails with a connection error when the endpoint
    /// cannot be reached or the process cannot be spawned.
    async fn connect(&self) -> TransportResult<()>;

    /// Close the channel. Idempotent: disconnecting an already-closed
    /// transport is a no-op.
    async fn disconnect(&self) -> TransportResult<()>;

    /// Send one frame. Fails when not connected.
    async fn send(&self, message: TransportMessage) -> TransportResult<()>;

    /// Receive the next inbound frame. `None` means the channel has closed
    /// and no further frames will arrive.
    async fn receive(&self) -> TransportResult<Option<TransportMessage>>;

    /// Fire-and-forget notification built from a method name and params.
    async fn send_notification(&self, method: &str, params: Option<Value>) -> TransportResult<()> {
        let notification = JsonRpcNotification::new(method, params);
        let payload = serde_json::to_vec(&notification)?;
        self.send(TransportMessage::new(Bytes::from(payload))).await
    }

    /// Whether the transport is in the `Connected` state.
    fn is_connected(&self) -> bool {
        matches!(self.state(), TransportState::Connected)
    }
}
