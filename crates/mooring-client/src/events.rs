//! Client lifecycle events.
//!
//! The host application observes connection and sampling activity through
//! a bounded channel. Emission never blocks; when the consumer falls
//! behind, events are dropped rather than stalling a connection.

use mooring_protocol::ClassifiedError;
use tokio::sync::mpsc;
use tracing::trace;

/// Events surfaced to the host application.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Handshake completed; the connection is usable
    ConnectionEstablished { server: String },
    /// Connection torn down, deliberately or terminally
    ConnectionClosed { server: String, reason: Option<String> },
    /// A connection attempt or live connection failed
    ConnectionError { server: String, error: ClassifiedError },
    /// An outbound request or notification left the client
    MessageSent { server: String, method: String },
    /// An inbound notification or server request arrived
    MessageReceived { server: String, method: String },
    /// A heartbeat ping went unanswered
    HeartbeatFailed { server: String },
    /// A reconnection attempt is starting
    Reconnecting { server: String, attempt: u32 },
    /// A sampling request was accepted for handling
    SamplingStarted { server: String, id: String },
    /// A sampling request completed successfully
    SamplingCompleted { server: String, id: String },
    /// A sampling request failed, timed out, or was cancelled
    SamplingFailed { server: String, id: String, reason: String },
}

/// Non-blocking emitter for [`ClientEvent`]s.
#[derive(Debug, Clone)]
pub struct ClientEventEmitter {
    sender: mpsc::Sender<ClientEvent>,
}

impl ClientEventEmitter {
    /// Create an emitter and the receiving end the host consumes.
    pub fn new() -> (Self, mpsc::Receiver<ClientEvent>) {
        let (sender, receiver) = mpsc::channel(500);
        (Self { sender }, receiver)
    }

    /// Emit without blocking; full channels drop the event.
    pub fn emit(&self, event: ClientEvent) {
        if self.sender.try_send(event).is_err() {
            trace!("client event channel full, dropping event");
        }
    }
}

impl Default for ClientEventEmitter {
    fn default() -> Self {
        Self::new().0
    }
}
