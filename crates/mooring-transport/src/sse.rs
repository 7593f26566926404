//! SSE transport: POST outbound, streamed Server-Sent Events inbound.
//!
//! Outbound messages go over plain HTTP POST like the [`crate::http`]
//! transport. Inbound push arrives on a long-lived streaming GET of the
//! events endpoint, parsed from `event:`/`data:`/`id:` framing into
//! discrete messages. The last seen event id is resent as `Last-Event-ID`
//! when the stream drops so a cooperating server can resume.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::{mpsc, watch, Mutex as TokioMutex};
use tracing::{debug, info, trace, warn};

use crate::core::{Transport, TransportKind, TransportMessage, TransportState};
use crate::error::{TransportError, TransportResult};
use crate::events::TransportEventEmitter;

/// Configuration for the SSE transport.
#[derive(Debug, Clone)]
pub struct SseConfig {
    /// Base URL of the server
    pub base_url: String,
    /// Path of the SSE events endpoint
    pub events_path: String,
    /// Path receiving POSTed outbound messages
    pub post_path: String,
    /// Bearer token, applied as an Authorization header
    pub auth_token: Option<String>,
    /// Additional headers applied to every request
    pub headers: Vec<(String, String)>,
    /// Per-POST timeout
    pub request_timeout: Duration,
    /// Delay between stream reconnection attempts
    pub reconnect_delay: Duration,
    /// Reconnection attempts before the transport fails terminally
    pub max_reconnect_attempts: u32,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            events_path: "/events".to_string(),
            post_path: "/messages".to_string(),
            auth_token: None,
            headers: Vec::new(),
            request_timeout: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(2),
            max_reconnect_attempts: 5,
        }
    }
}

/// One parsed SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

/// Parse one blank-line-delimited SSE block. Returns `None` when the block
/// carries no data (comments, heartbeats).
pub(crate) fn parse_sse_block(block: &str) -> Option<SseEvent> {
    let mut event = SseEvent::default();
    let mut data_lines = Vec::new();
    for line in block.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.trim_start().to_string());
        } else if let Some(value) = line.strip_prefix("event:") {
            event.event = Some(value.trim_start().to_string());
        } else if let Some(value) = line.strip_prefix("id:") {
            event.id = Some(value.trim_start().to_string());
        }
        // Comment lines (leading ':') and unknown fields are ignored.
    }
    if data_lines.is_empty() {
        return None;
    }
    event.data = data_lines.join("\n");
    Some(event)
}

/// Server-Sent Events transport.
#[derive(Debug)]
pub struct SseTransport {
    config: SseConfig,
    client: reqwest::Client,
    state: Arc<StdMutex<TransportState>>,
    last_event_id: Arc<StdMutex<Option<String>>>,
    inbound_rx: Arc<TokioMutex<mpsc::Receiver<TransportMessage>>>,
    inbound_tx: mpsc::Sender<TransportMessage>,
    /// Shutdown flag. A watch channel keeps the signal observable even
    /// when the stream task is mid-chunk rather than parked on a select.
    shutdown: watch::Sender<bool>,
    events: TransportEventEmitter,
}

impl SseTransport {
    /// Create a transport for the given endpoints.
    pub fn new(config: SseConfig) -> TransportResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                TransportError::ConfigurationError(format!("failed to build HTTP client: {e}"))
            })?;
        let (inbound_tx, inbound_rx) = mpsc::channel(100);
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            config,
            client,
            state: Arc::new(StdMutex::new(TransportState::Disconnected)),
            last_event_id: Arc::new(StdMutex::new(None)),
            inbound_rx: Arc::new(TokioMutex::new(inbound_rx)),
            inbound_tx,
            shutdown,
            events: TransportEventEmitter::default(),
        })
    }

    /// Create a transport that reports lifecycle events through `events`.
    pub fn with_events(config: SseConfig, events: TransportEventEmitter) -> TransportResult<Self> {
        let mut transport = Self::new(config)?;
        transport.events = events;
        Ok(transport)
    }

    fn set_state(&self, state: TransportState) {
        *self.state.lock().expect("state mutex poisoned") = state;
    }

    fn events_url(&self) -> String {
        format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.events_path
        )
    }

    fn post_url(&self) -> String {
        format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.post_path
        )
    }

    fn base_headers(&self) -> TransportResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &self.config.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                TransportError::ConfigurationError(format!("invalid auth token: {e}"))
            })?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }
        for (name, value) in &self.config.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                TransportError::ConfigurationError(format!("invalid header name '{name}': {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                TransportError::ConfigurationError(format!("invalid header value: {e}"))
            })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    /// Stream the events endpoint until shutdown, reconnecting with capped
    /// attempts on stream loss. Runs as a background task.
    fn spawn_stream_task(&self, headers: HeaderMap) {
        let client = self.client.clone();
        let events_url = self.events_url();
        let state = Arc::clone(&self.state);
        let last_event_id = Arc::clone(&self.last_event_id);
        let inbound_tx = self.inbound_tx.clone();
        let mut shutdown = self.shutdown.subscribe();
        let events = self.events.clone();
        let reconnect_delay = self.config.reconnect_delay;
        let max_attempts = self.config.max_reconnect_attempts;

        tokio::spawn(async move {
            let attempts = AtomicU32::new(0);
            loop {
                if *shutdown.borrow() {
                    break;
                }
                let resume_from = last_event_id.lock().expect("id mutex poisoned").clone();
                let mut request_headers = headers.clone();
                request_headers.insert(
                    reqwest::header::ACCEPT,
                    HeaderValue::from_static("text/event-stream"),
                );
                if let Some(id) = &resume_from {
                    if let Ok(value) = HeaderValue::from_str(id) {
                        request_headers.insert("last-event-id", value);
                    }
                }

                let connect = client
                    .get(&events_url)
                    .headers(request_headers)
                    // The stream is long-lived; the per-request timeout
                    // would sever it mid-flight.
                    .timeout(Duration::from_secs(u64::MAX / 4))
                    .send();

                let response = tokio::select! {
                    _ = shutdown.changed() => break,
                    result = connect => result,
                };

                match response {
                    Ok(response) if response.status().is_success() => {
                        debug!(url = %events_url, "SSE stream open");
                        attempts.store(0, Ordering::Relaxed);
                        let mut stream = response.bytes_stream();
                        let mut buffer = String::new();
                        loop {
                            let chunk = tokio::select! {
                                _ = shutdown.changed() => return,
                                chunk = stream.next() => chunk,
                            };
                            match chunk {
                                Some(Ok(bytes)) => {
                                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                                    while let Some(pos) = buffer.find("\n\n") {
                                        let block = buffer[..pos].to_string();
                                        buffer.drain(..pos + 2);
                                        let Some(event) = parse_sse_block(&block) else {
                                            continue;
                                        };
                                        if let Some(id) = &event.id {
                                            *last_event_id.lock().expect("id mutex poisoned") =
                                                Some(id.clone());
                                        }
                                        trace!(size = event.data.len(), "SSE event received");
                                        events.emit_message_received(event.data.len());
                                        let message =
                                            TransportMessage::new(Bytes::from(event.data));
                                        if inbound_tx.send(message).await.is_err() {
                                            debug!("inbound receiver dropped, stopping SSE task");
                                            return;
                                        }
                                    }
                                }
                                Some(Err(e)) => {
                                    warn!(error = %e, "SSE stream error");
                                    break;
                                }
                                None => {
                                    debug!("SSE stream ended");
                                    break;
                                }
                            }
                        }
                    }
                    Ok(response) => {
                        warn!(status = %response.status(), "SSE endpoint returned non-success");
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to open SSE stream");
                    }
                }

                let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
                if attempt > max_attempts {
                    warn!(attempts = attempt, "SSE reconnection attempts exhausted");
                    *state.lock().expect("state mutex poisoned") = TransportState::Failed {
                        reason: "SSE reconnection attempts exhausted".to_string(),
                    };
                    events.emit_disconnected(
                        TransportKind::Sse,
                        events_url.clone(),
                        Some("reconnection attempts exhausted".to_string()),
                    );
                    return;
                }
                debug!(attempt, "reconnecting SSE stream");
                tokio::select! {
                    _ = shutdown.changed() => return,
                    () = tokio::time::sleep(reconnect_delay) => {}
                }
            }
        });
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    fn endpoint(&self) -> String {
        self.config.base_url.clone()
    }

    fn state(&self) -> TransportState {
        self.state.lock().expect("state mutex poisoned").clone()
    }

    async fn connect(&self) -> TransportResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        if self.config.base_url.is_empty() {
            return Err(TransportError::ConfigurationError(
                "base_url cannot be empty".to_string(),
            ));
        }
        url::Url::parse(&self.config.base_url)
            .map_err(|e| TransportError::ConfigurationError(format!("invalid url: {e}")))?;

        self.set_state(TransportState::Connecting);
        let headers = self.base_headers()?;
        // A previous disconnect leaves the flag raised.
        let _ = self.shutdown.send(false);
        self.spawn_stream_task(headers);
        self.set_state(TransportState::Connected);
        info!(url = %self.config.base_url, "SSE transport connected");
        self.events
            .emit_connected(TransportKind::Sse, self.endpoint());
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        if matches!(self.state(), TransportState::Disconnected) {
            return Ok(());
        }
        self.set_state(TransportState::Disconnecting);
        let _ = self.shutdown.send(true);
        self.set_state(TransportState::Disconnected);
        self.events.emit_disconnected(
            TransportKind::Sse,
            self.endpoint(),
            Some("disconnect requested".to_string()),
        );
        Ok(())
    }

    async fn send(&self, message: TransportMessage) -> TransportResult<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let size = message.size();
        let mut headers = self.base_headers()?;
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        let response = self
            .client
            .post(self.post_url())
            .headers(headers)
            .body(message.payload.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout("SSE outbound POST".to_string())
                } else {
                    TransportError::SendFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::SendFailed(format!(
                "server returned {status}"
            )));
        }
        self.events.emit_message_sent(size);
        trace!(size, "posted message to SSE server");
        Ok(())
    }

    async fn receive(&self) -> TransportResult<Option<TransportMessage>> {
        let mut inbound_rx = self.inbound_rx.lock().await;
        Ok(inbound_rx.recv().await)
    }
}
