//! Per-connection bookkeeping: lifecycle state and negotiated
//! capabilities.

use chrono::{DateTime, Utc};
use mooring_protocol::ServerCapabilities;
use mooring_transport::TransportKind;
use uuid::Uuid;

/// Lifecycle state of a managed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport connect and handshake in progress
    Connecting,
    /// Handshake complete, requests flowing
    Connected,
    /// Cleanly closed
    Disconnected,
    /// Failed; reconnection may be in progress
    Error,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A snapshot of one managed connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Generated per-connection id; changes on every reconnect
    pub id: String,
    /// Configured server name
    pub server: String,
    /// Transport kind in use
    pub kind: TransportKind,
    /// Current lifecycle state
    pub state: ConnectionState,
    /// When this connection was created
    pub created_at: DateTime<Utc>,
    /// Last request, response, or heartbeat activity
    pub last_activity: DateTime<Utc>,
    /// Capabilities the server declared during the handshake
    pub capabilities: Option<ServerCapabilities>,
}

impl ConnectionInfo {
    /// A fresh record in the `Connecting` state.
    pub fn new(server: impl Into<String>, kind: TransportKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            server: server.into(),
            kind,
            state: ConnectionState::Connecting,
            created_at: now,
            last_activity: now,
            capabilities: None,
        }
    }

    /// Record activity on the connection.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn new_connections_start_connecting() {
        let info = ConnectionInfo::new("github", TransportKind::Subprocess);
        assert_eq!(info.state, ConnectionState::Connecting);
        assert_eq!(info.server, "github");
        assert!(info.capabilities.is_none());
        assert!(!info.id.is_empty());
    }

    #[test]
    fn ids_are_unique_per_connection() {
        let a = ConnectionInfo::new("s", TransportKind::Http);
        let b = ConnectionInfo::new("s", TransportKind::Http);
        assert_ne!(a.id, b.id);
    }
}
