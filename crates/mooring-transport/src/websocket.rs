//! WebSocket transport: full duplex with keepalive, reconnection, and
//! replay of unacknowledged traffic.
//!
//! Connection lifecycle is a strict state machine:
//!
//! ```text
//! idle -> connecting -> connected -> { reconnecting -> connecting
//!                                    | closing -> closed }
//! ```
//!
//! `connect` is only legal from `idle` or `reconnecting`; anywhere else it
//! is a programming error, not a transient failure. While connected, two
//! keepalives run on the same cadence: a protocol ping and an
//! application-level `keep_alive` notification, since intermediaries have
//! been observed dropping idle sockets despite protocol pings.
//!
//! Tagged frames enter a bounded [`ReplayBuffer`] before transmission. On
//! reconnect the last-sent tag goes up in a `last-message-id` request
//! header; a cooperating server answers with `last-received-id` and every
//! buffered frame after that tag is resent in order.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::core::{Transport, TransportKind, TransportMessage, TransportState};
use crate::error::{TransportError, TransportResult};
use crate::events::TransportEventEmitter;
use crate::replay::ReplayBuffer;

/// Request header carrying the last tag this client sent.
pub const LAST_MESSAGE_ID_HEADER: &str = "last-message-id";
/// Response header carrying the last tag the server received.
pub const LAST_RECEIVED_ID_HEADER: &str = "last-received-id";

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Reconnection behavior after an unexpected disconnect.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first attempt
    pub initial_delay: Duration,
    /// Upper bound on the per-attempt delay
    pub max_delay: Duration,
    /// Delay doubling factor per attempt
    pub backoff_factor: f64,
    /// Attempts before the connection is permanently closed
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            max_attempts: 3,
        }
    }
}

/// Configuration for the WebSocket transport.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// `ws://` or `wss://` URL to connect to
    pub url: String,
    /// Cadence of both keepalives
    pub keepalive_interval: Duration,
    /// Capacity of the replay buffer
    pub replay_capacity: usize,
    /// Reconnection behavior
    pub reconnect: ReconnectConfig,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            keepalive_interval: Duration::from_secs(10),
            replay_capacity: 64,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// The transport's own lifecycle states, stricter than [`TransportState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsState {
    /// Never connected
    Idle,
    /// Handshake in progress
    Connecting,
    /// Ready for traffic
    Connected,
    /// Lost the socket, backoff loop running
    Reconnecting,
    /// Deliberate shutdown in progress
    Closing,
    /// Terminal: explicitly closed or reconnection exhausted
    Closed,
}

#[derive(Debug)]
struct WsShared {
    config: WebSocketConfig,
    ws_state: StdMutex<WsState>,
    writer: TokioMutex<Option<WsWriter>>,
    inbound_tx: StdMutex<Option<mpsc::Sender<TransportMessage>>>,
    inbound_rx: TokioMutex<mpsc::Receiver<TransportMessage>>,
    replay: StdMutex<ReplayBuffer>,
    last_sent: StdMutex<Option<Uuid>>,
    /// Generation counter: a reader task only reacts to a lost stream if
    /// its generation is still current, so stale tasks from a replaced
    /// connection cannot trigger spurious reconnects.
    generation: StdMutex<u64>,
    events: TransportEventEmitter,
}

impl WsShared {
    fn ws_state(&self) -> WsState {
        *self.ws_state.lock().expect("state mutex poisoned")
    }

    fn set_ws_state(&self, state: WsState) {
        *self.ws_state.lock().expect("state mutex poisoned") = state;
    }

    fn bump_generation(&self) -> u64 {
        let mut generation = self.generation.lock().expect("generation mutex poisoned");
        *generation += 1;
        *generation
    }

    fn current_generation(&self) -> u64 {
        *self.generation.lock().expect("generation mutex poisoned")
    }

    /// Open the socket, advertise our last-sent tag, and return the tag
    /// the server reports having received.
    async fn establish(self: &Arc<Self>) -> TransportResult<Option<Uuid>> {
        let mut request = self.config.url.as_str().into_client_request().map_err(|e| {
            TransportError::ConfigurationError(format!("invalid websocket url: {e}"))
        })?;
        let last_sent = *self.last_sent.lock().expect("last_sent mutex poisoned");
        if let Some(tag) = last_sent {
            if let Ok(value) = tag.to_string().parse() {
                request.headers_mut().insert(LAST_MESSAGE_ID_HEADER, value);
            }
        }

        let (stream, response) = connect_async(request).await.map_err(|e| {
            TransportError::ConnectionFailed(format!("websocket handshake failed: {e}"))
        })?;

        let acked = response
            .headers()
            .get(LAST_RECEIVED_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| Uuid::parse_str(value).ok());

        let (writer, reader) = stream.split();
        *self.writer.lock().await = Some(writer);

        let generation = self.bump_generation();
        self.spawn_reader_task(reader, generation);
        self.spawn_keepalive_task(generation);

        debug!(url = %self.config.url, ?acked, "websocket stream established");
        Ok(acked)
    }

    fn spawn_reader_task(self: &Arc<Self>, mut reader: WsReader, generation: u64) {
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let reason = loop {
                match reader.next().await {
                    Some(Ok(Message::Text(text))) => {
                        trace!(size = text.len(), "websocket text frame received");
                        shared.events.emit_message_received(text.len());
                        let sender = shared
                            .inbound_tx
                            .lock()
                            .expect("inbound mutex poisoned")
                            .clone();
                        let Some(sender) = sender else { return };
                        if sender
                            .send(TransportMessage::new(Bytes::from(text)))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        shared.events.emit_message_received(data.len());
                        let sender = shared
                            .inbound_tx
                            .lock()
                            .expect("inbound mutex poisoned")
                            .clone();
                        let Some(sender) = sender else { return };
                        if sender
                            .send(TransportMessage::new(Bytes::from(data)))
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let mut writer = shared.writer.lock().await;
                        if let Some(writer) = writer.as_mut() {
                            let _ = writer.send(Message::Pong(payload)).await;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        trace!("keepalive pong received");
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "websocket close frame received");
                        break "server closed the connection".to_string();
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "websocket read error");
                        break format!("read error: {e}");
                    }
                    None => break "stream ended".to_string(),
                }
            };
            if shared.current_generation() == generation {
                shared.on_stream_lost(reason);
            }
        });
    }

    fn spawn_keepalive_task(self: &Arc<Self>, generation: u64) {
        let shared = Arc::clone(self);
        let interval = self.config.keepalive_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick completes immediately
            loop {
                ticker.tick().await;
                if shared.current_generation() != generation
                    || shared.ws_state() != WsState::Connected
                {
                    debug!("keepalive task stopping");
                    return;
                }
                let keep_alive = mooring_protocol::JsonRpcNotification::new("keep_alive", None);
                let Ok(frame) = serde_json::to_string(&keep_alive) else {
                    return;
                };
                let mut writer = shared.writer.lock().await;
                if let Some(writer) = writer.as_mut() {
                    if let Err(e) = writer.send(Message::Ping(Vec::new())).await {
                        warn!(error = %e, "keepalive ping failed");
                        continue;
                    }
                    if let Err(e) = writer.send(Message::Text(frame)).await {
                        warn!(error = %e, "keepalive frame failed");
                        continue;
                    }
                    trace!("keepalive sent");
                }
            }
        });
    }

    /// React to a lost stream: either finish a deliberate close or start
    /// the reconnection loop.
    fn on_stream_lost(self: &Arc<Self>, reason: String) {
        match self.ws_state() {
            WsState::Closing | WsState::Closed => {
                self.set_ws_state(WsState::Closed);
                return;
            }
            WsState::Reconnecting => return,
            _ => {}
        }

        info!(reason = %reason, "websocket connection lost, scheduling reconnect");
        self.set_ws_state(WsState::Reconnecting);
        self.events.emit_disconnected(
            TransportKind::WebSocket,
            self.config.url.clone(),
            Some(reason),
        );

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            shared.reconnect_loop().await;
        });
    }

    /// Exponential-backoff reconnection. Doubles per attempt, capped; after
    /// the final attempt the connection is permanently closed.
    async fn reconnect_loop(self: &Arc<Self>) {
        let reconnect = self.config.reconnect.clone();
        let mut delay = reconnect.initial_delay;

        for attempt in 1..=reconnect.max_attempts {
            sleep(delay).await;
            if self.ws_state() != WsState::Reconnecting {
                // Explicitly closed while we were waiting.
                return;
            }

            debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnect attempt");
            self.set_ws_state(WsState::Connecting);

            match self.establish().await {
                Ok(acked) => match self.replay_after(acked).await {
                    Ok(replayed) => {
                        self.set_ws_state(WsState::Connected);
                        info!(attempt, replayed, "websocket reconnected");
                        self.events
                            .emit_connected(TransportKind::WebSocket, self.config.url.clone());
                        return;
                    }
                    Err(e) => {
                        warn!(attempt, error = %e, "replay failed after reconnect");
                        self.set_ws_state(WsState::Reconnecting);
                    }
                },
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                    self.set_ws_state(WsState::Reconnecting);
                }
            }

            delay = Duration::from_secs_f64(
                (delay.as_secs_f64() * reconnect.backoff_factor)
                    .min(reconnect.max_delay.as_secs_f64()),
            );
        }

        warn!(
            attempts = reconnect.max_attempts,
            "websocket reconnection exhausted, closing permanently"
        );
        self.set_ws_state(WsState::Closed);
        self.close_inbound();
        self.events.emit_disconnected(
            TransportKind::WebSocket,
            self.config.url.clone(),
            Some("reconnection attempts exhausted".to_string()),
        );
    }

    /// Resend every buffered frame after `acked`, in order. Any failure
    /// aborts the replay; the caller re-enters the error path.
    async fn replay_after(self: &Arc<Self>, acked: Option<Uuid>) -> TransportResult<usize> {
        let entries = self
            .replay
            .lock()
            .expect("replay mutex poisoned")
            .after(acked);
        if entries.is_empty() {
            return Ok(0);
        }

        let count = entries.len();
        debug!(count, ?acked, "replaying unacknowledged frames");
        let mut writer = self.writer.lock().await;
        let writer = writer
            .as_mut()
            .ok_or_else(|| TransportError::ConnectionLost("writer unavailable".to_string()))?;
        for entry in entries {
            let text = String::from_utf8(entry.payload.to_vec())
                .map_err(|e| TransportError::SerializationFailed(format!("invalid UTF-8: {e}")))?;
            writer
                .send(Message::Text(text))
                .await
                .map_err(|e| TransportError::SendFailed(format!("replay failed: {e}")))?;
        }
        Ok(count)
    }

    /// Drop the inbound sender so `receive` observes end-of-stream.
    fn close_inbound(&self) {
        *self.inbound_tx.lock().expect("inbound mutex poisoned") = None;
    }
}

/// WebSocket client transport.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    inner: Arc<WsShared>,
}

impl WebSocketTransport {
    /// Create a transport for the given URL.
    pub fn new(config: WebSocketConfig) -> Self {
        Self::with_events(config, TransportEventEmitter::default())
    }

    /// Create a transport that reports lifecycle events through `events`.
    pub fn with_events(config: WebSocketConfig, events: TransportEventEmitter) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(100);
        let replay_capacity = config.replay_capacity;
        Self {
            inner: Arc::new(WsShared {
                config,
                ws_state: StdMutex::new(WsState::Idle),
                writer: TokioMutex::new(None),
                inbound_tx: StdMutex::new(Some(inbound_tx)),
                inbound_rx: TokioMutex::new(inbound_rx),
                replay: StdMutex::new(ReplayBuffer::new(replay_capacity)),
                last_sent: StdMutex::new(None),
                generation: StdMutex::new(0),
                events,
            }),
        }
    }

    /// The strict lifecycle state, finer-grained than [`TransportState`].
    pub fn ws_state(&self) -> WsState {
        self.inner.ws_state()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    fn endpoint(&self) -> String {
        self.inner.config.url.clone()
    }

    fn state(&self) -> TransportState {
        match self.inner.ws_state() {
            WsState::Idle => TransportState::Disconnected,
            WsState::Connecting | WsState::Reconnecting => TransportState::Connecting,
            WsState::Connected => TransportState::Connected,
            WsState::Closing => TransportState::Disconnecting,
            WsState::Closed => TransportState::Disconnected,
        }
    }

    async fn connect(&self) -> TransportResult<()> {
        match self.inner.ws_state() {
            WsState::Idle | WsState::Reconnecting => {}
            state => {
                return Err(TransportError::ConfigurationError(format!(
                    "connect is not legal from state {state:?}"
                )));
            }
        }
        if self.inner.config.url.is_empty() {
            return Err(TransportError::ConfigurationError(
                "url cannot be empty".to_string(),
            ));
        }

        self.inner.set_ws_state(WsState::Connecting);
        match self.inner.establish().await {
            Ok(_) => {
                self.inner.set_ws_state(WsState::Connected);
                info!(url = %self.inner.config.url, "websocket connected");
                self.inner
                    .events
                    .emit_connected(TransportKind::WebSocket, self.endpoint());
                Ok(())
            }
            Err(e) => {
                self.inner.set_ws_state(WsState::Idle);
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> TransportResult<()> {
        match self.inner.ws_state() {
            WsState::Idle | WsState::Closed => return Ok(()),
            _ => {}
        }
        self.inner.set_ws_state(WsState::Closing);
        self.inner.bump_generation(); // detach reader and keepalive tasks

        let mut writer = self.inner.writer.lock().await;
        if let Some(mut writer) = writer.take() {
            let _ = writer.send(Message::Close(None)).await;
        }
        drop(writer);

        self.inner.set_ws_state(WsState::Closed);
        self.inner.close_inbound();
        self.inner.events.emit_disconnected(
            TransportKind::WebSocket,
            self.endpoint(),
            Some("disconnect requested".to_string()),
        );
        Ok(())
    }

    async fn send(&self, message: TransportMessage) -> TransportResult<()> {
        if self.inner.ws_state() != WsState::Connected {
            return Err(TransportError::NotConnected);
        }

        // Tagged frames are buffered before transmission so they survive
        // into the replay window even if the socket dies mid-send.
        if let Some(tag) = message.tag {
            self.inner
                .replay
                .lock()
                .expect("replay mutex poisoned")
                .push(tag, message.payload.clone());
            *self.inner.last_sent.lock().expect("last_sent mutex poisoned") = Some(tag);
        }

        let text = String::from_utf8(message.payload.to_vec())
            .map_err(|e| TransportError::SerializationFailed(format!("invalid UTF-8: {e}")))?;
        let size = text.len();

        let mut writer = self.inner.writer.lock().await;
        let writer = writer
            .as_mut()
            .ok_or_else(|| TransportError::ConnectionLost("writer unavailable".to_string()))?;
        writer
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        self.inner.events.emit_message_sent(size);
        Ok(())
    }

    async fn receive(&self) -> TransportResult<Option<TransportMessage>> {
        let mut inbound_rx = self.inner.inbound_rx.lock().await;
        Ok(inbound_rx.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::net::TcpListener;

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.backoff_factor, 2.0);
    }

    #[tokio::test]
    async fn starts_idle() {
        let transport = WebSocketTransport::new(WebSocketConfig {
            url: "ws://127.0.0.1:9/ws".to_string(),
            ..Default::default()
        });
        assert_eq!(transport.ws_state(), WsState::Idle);
        assert_eq!(transport.state(), TransportState::Disconnected);
    }

    #[tokio::test]
    async fn send_requires_connection() {
        let transport = WebSocketTransport::new(WebSocketConfig::default());
        let result = transport
            .send(TransportMessage::new(Bytes::from_static(b"{}")))
            .await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn connect_refused_leaves_idle() {
        let transport = WebSocketTransport::new(WebSocketConfig {
            url: "ws://127.0.0.1:9/ws".to_string(),
            ..Default::default()
        });
        assert!(transport.connect().await.is_err());
        assert_eq!(transport.ws_state(), WsState::Idle);
    }

    #[tokio::test]
    async fn connect_from_connected_is_a_programming_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            // Hold the socket open until the client goes away.
            while ws.next().await.is_some() {}
        });

        let transport = WebSocketTransport::new(WebSocketConfig {
            url: format!("ws://{addr}"),
            ..Default::default()
        });
        transport.connect().await.unwrap();
        assert_eq!(transport.ws_state(), WsState::Connected);

        let result = transport.connect().await;
        assert!(matches!(
            result,
            Err(TransportError::ConfigurationError(_))
        ));
        transport.disconnect().await.unwrap();
        assert_eq!(transport.ws_state(), WsState::Closed);
    }

    #[tokio::test]
    async fn echo_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    if ws.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            }
        });

        let transport = WebSocketTransport::new(WebSocketConfig {
            url: format!("ws://{addr}"),
            ..Default::default()
        });
        transport.connect().await.unwrap();
        transport
            .send(TransportMessage::new(Bytes::from_static(
                br#"{"jsonrpc":"2.0","method":"ping","id":1}"#,
            )))
            .await
            .unwrap();

        let received = transport.receive().await.unwrap().unwrap();
        assert_eq!(
            received.payload,
            Bytes::from_static(br#"{"jsonrpc":"2.0","method":"ping","id":1}"#)
        );
        transport.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let transport = WebSocketTransport::new(WebSocketConfig::default());
        assert!(transport.disconnect().await.is_ok());
        assert!(transport.disconnect().await.is_ok());
        assert_eq!(transport.ws_state(), WsState::Idle);
    }
}
