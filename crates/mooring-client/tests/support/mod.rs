//! Shared test doubles: a scripted in-memory transport that plays the
//! server side of the protocol.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex as TokioMutex};

use mooring_protocol::{JsonRpcMessage, JsonRpcResponse, PROTOCOL_VERSION};
use mooring_transport::{
    Transport, TransportError, TransportKind, TransportMessage, TransportResult, TransportState,
};

/// In-memory transport that answers requests like a minimal MCP server.
///
/// `connect` fails for the first `failures` attempts, then succeeds.
/// Responses to a configured slow method are delayed, everything else is
/// answered immediately.
#[derive(Debug)]
pub struct MockTransport {
    failures_remaining: AtomicU32,
    connect_attempts: AtomicU32,
    state: StdMutex<TransportState>,
    inbound_tx: mpsc::Sender<TransportMessage>,
    inbound_rx: TokioMutex<mpsc::Receiver<TransportMessage>>,
    slow_method: Option<(String, Duration)>,
    connect_delay: Option<Duration>,
}

impl MockTransport {
    pub fn new(failures: u32) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(32);
        Self {
            failures_remaining: AtomicU32::new(failures),
            connect_attempts: AtomicU32::new(0),
            state: StdMutex::new(TransportState::Disconnected),
            inbound_tx,
            inbound_rx: TokioMutex::new(inbound_rx),
            slow_method: None,
            connect_delay: None,
        }
    }

    /// Delay the response to one method; used to trigger request timeouts.
    pub fn with_slow_method(mut self, method: &str, delay: Duration) -> Self {
        self.slow_method = Some((method.to_string(), delay));
        self
    }

    /// Make `connect` take a while; used to overlap racing connects.
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    fn response_for(method: &str, id: mooring_protocol::RequestId) -> JsonRpcResponse {
        let result = match method {
            "initialize" => serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "mock-server", "version": "1.0.0"},
            }),
            "tools/list" => serde_json::json!({
                "tools": [{"name": "echo", "inputSchema": {"type": "object"}}],
            }),
            _ => serde_json::json!({}),
        };
        JsonRpcResponse::success(result, id)
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn endpoint(&self) -> String {
        "mock://server".to_string()
    }

    fn state(&self) -> TransportState {
        self.state.lock().expect("state mutex poisoned").clone()
    }

    async fn connect(&self) -> TransportResult<()> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.failures_remaining.load(Ordering::SeqCst) > 0 {
            self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(TransportError::ConnectionFailed(
                "mock connection refused".to_string(),
            ));
        }
        *self.state.lock().expect("state mutex poisoned") = TransportState::Connected;
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        *self.state.lock().expect("state mutex poisoned") = TransportState::Disconnected;
        Ok(())
    }

    async fn send(&self, message: TransportMessage) -> TransportResult<()> {
        let parsed: JsonRpcMessage = serde_json::from_slice(&message.payload)
            .map_err(|e| TransportError::SerializationFailed(e.to_string()))?;
        // Notifications get no reply; requests are answered by method.
        if let JsonRpcMessage::Request(request) = parsed {
            let response = Self::response_for(&request.method, request.id);
            let frame = TransportMessage::new(Bytes::from(
                serde_json::to_vec(&response)
                    .map_err(|e| TransportError::SerializationFailed(e.to_string()))?,
            ));
            let delay = self
                .slow_method
                .as_ref()
                .filter(|(method, _)| *method == request.method)
                .map(|(_, delay)| *delay);
            let sender = self.inbound_tx.clone();
            match delay {
                Some(delay) => {
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = sender.send(frame).await;
                    });
                }
                None => {
                    let _ = sender.send(frame).await;
                }
            }
        }
        Ok(())
    }

    async fn receive(&self) -> TransportResult<Option<TransportMessage>> {
        let mut inbound_rx = self.inbound_rx.lock().await;
        Ok(inbound_rx.recv().await)
    }
}
