//! Transport event types.

use tokio::sync::mpsc;

use crate::core::TransportKind;
use crate::error::TransportError;

/// Events a transport reports over its lifecycle.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A connection has been established.
    Connected {
        /// The kind of transport that connected
        kind: TransportKind,
        /// The endpoint of the connection
        endpoint: String,
    },

    /// A connection has been lost or closed.
    Disconnected {
        /// The kind of transport that disconnected
        kind: TransportKind,
        /// The endpoint of the connection
        endpoint: String,
        /// Optional reason for the disconnection
        reason: Option<String>,
    },

    /// A message was sent.
    MessageSent {
        /// Payload size in bytes
        size: usize,
    },

    /// A message was received.
    MessageReceived {
        /// Payload size in bytes
        size: usize,
    },

    /// An error occurred in the transport.
    Error {
        /// The error that occurred
        error: TransportError,
        /// Additional context
        context: Option<String>,
    },
}

/// Broadcasts `TransportEvent`s to a single listener over a bounded channel.
#[derive(Debug, Clone)]
pub struct TransportEventEmitter {
    sender: mpsc::Sender<TransportEvent>,
}

impl TransportEventEmitter {
    /// Creates an emitter and its receiving end.
    #[must_use]
    pub fn new() -> (Self, mpsc::Receiver<TransportEvent>) {
        let (sender, receiver) = mpsc::channel(500);
        (Self { sender }, receiver)
    }

    /// Emits an event, dropping it if the channel is full to avoid blocking.
    pub fn emit(&self, event: TransportEvent) {
        let _ = self.sender.try_send(event);
    }

    /// Emits a `Connected` event.
    pub fn emit_connected(&self, kind: TransportKind, endpoint: String) {
        self.emit(TransportEvent::Connected { kind, endpoint });
    }

    /// Emits a `Disconnected` event.
    pub fn emit_disconnected(&self, kind: TransportKind, endpoint: String, reason: Option<String>) {
        self.emit(TransportEvent::Disconnected {
            kind,
            endpoint,
            reason,
        });
    }

    /// Emits a `MessageSent` event.
    pub fn emit_message_sent(&self, size: usize) {
        self.emit(TransportEvent::MessageSent { size });
    }

    /// Emits a `MessageReceived` event.
    pub fn emit_message_received(&self, size: usize) {
        self.emit(TransportEvent::MessageReceived { size });
    }

    /// Emits an `Error` event.
    pub fn emit_error(&self, error: TransportError, context: Option<String>) {
        self.emit(TransportEvent::Error { error, context });
    }
}

impl Default for TransportEventEmitter {
    fn default() -> Self {
        Self::new().0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn emitted_events_arrive_in_order() {
        let (emitter, mut receiver) = TransportEventEmitter::new();

        emitter.emit_connected(TransportKind::Subprocess, "stdio://cat".to_string());
        emitter.emit_message_sent(42);

        match receiver.recv().await.unwrap() {
            TransportEvent::Connected { kind, endpoint } => {
                assert_eq!(kind, TransportKind::Subprocess);
                assert_eq!(endpoint, "stdio://cat");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(
            receiver.recv().await.unwrap(),
            TransportEvent::MessageSent { size: 42 }
        ));
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (emitter, receiver) = TransportEventEmitter::new();
        for _ in 0..600 {
            emitter.emit_message_sent(1);
        }
        // Still alive, nothing blocked.
        drop(receiver);
        emitter.emit_message_sent(1);
    }
}
