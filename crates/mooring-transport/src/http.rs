//! HTTP transport: plain request/response, no push.
//!
//! `send` POSTs the frame to the server endpoint; a non-empty 2xx body is
//! the emitted inbound message and surfaces from `receive`. There is no
//! server-initiated traffic on this transport.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tracing::{debug, info, trace, warn};

use crate::core::{Transport, TransportKind, TransportMessage, TransportState};
use crate::error::{TransportError, TransportResult};
use crate::events::TransportEventEmitter;

/// Configuration for the HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Server endpoint receiving POSTed messages
    pub url: String,
    /// Bearer token, applied as an Authorization header
    pub auth_token: Option<String>,
    /// Additional headers applied to every request
    pub headers: Vec<(String, String)>,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Path probed by the permissive connect-time health check
    pub health_path: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auth_token: None,
            headers: Vec::new(),
            request_timeout: Duration::from_secs(30),
            health_path: "/health".to_string(),
        }
    }
}

/// HTTP request/response transport.
#[derive(Debug)]
pub struct HttpTransport {
    config: HttpConfig,
    client: reqwest::Client,
    state: Arc<StdMutex<TransportState>>,
    inbound_tx: mpsc::Sender<TransportMessage>,
    inbound_rx: Arc<TokioMutex<mpsc::Receiver<TransportMessage>>>,
    events: TransportEventEmitter,
}

impl HttpTransport {
    /// Create a transport for the given endpoint.
    pub fn new(config: HttpConfig) -> TransportResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                TransportError::ConfigurationError(format!("failed to build HTTP client: {e}"))
            })?;
        let (inbound_tx, inbound_rx) = mpsc::channel(100);
        Ok(Self {
            config,
            client,
            state: Arc::new(StdMutex::new(TransportState::Disconnected)),
            inbound_tx,
            inbound_rx: Arc::new(TokioMutex::new(inbound_rx)),
            events: TransportEventEmitter::default(),
        })
    }

    /// Create a transport that reports lifecycle events through `events`.
    pub fn with_events(config: HttpConfig, events: TransportEventEmitter) -> TransportResult<Self> {
        let mut transport = Self::new(config)?;
        transport.events = events;
        Ok(transport)
    }

    fn set_state(&self, state: TransportState) {
        *self.state.lock().expect("state mutex poisoned") = state;
    }

    fn request_headers(&self) -> TransportResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
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

    /// Probe the health endpoint without hard-failing: servers are not
    /// required to expose one, so only log the outcome.
    async fn health_check(&self) {
        let url = format!(
            "{}{}",
            self.config.url.trim_end_matches('/'),
            self.config.health_path
        );
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(url = %url, "health check passed");
            }
            Ok(response) => {
                debug!(url = %url, status = %response.status(), "health check returned non-success");
            }
            Err(e) => {
                debug!(url = %url, error = %e, "health check unreachable");
            }
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn endpoint(&self) -> String {
        self.config.url.clone()
    }

    fn state(&self) -> TransportState {
        self.state.lock().expect("state mutex poisoned").clone()
    }

    async fn connect(&self) -> TransportResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        if self.config.url.is_empty() {
            return Err(TransportError::ConfigurationError(
                "url cannot be empty".to_string(),
            ));
        }
        url::Url::parse(&self.config.url)
            .map_err(|e| TransportError::ConfigurationError(format!("invalid url: {e}")))?;

        self.set_state(TransportState::Connecting);
        self.health_check().await;
        self.set_state(TransportState::Connected);
        info!(url = %self.config.url, "HTTP transport connected");
        self.events
            .emit_connected(TransportKind::Http, self.endpoint());
        Ok(())
    }

    async fn disconnect(&self) -> TransportResult<()> {
        if matches!(self.state(), TransportState::Disconnected) {
            return Ok(());
        }
        self.set_state(TransportState::Disconnected);
        self.events.emit_disconnected(
            TransportKind::Http,
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
        let response = self
            .client
            .post(&self.config.url)
            .headers(self.request_headers()?)
            .body(message.payload.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout("HTTP request".to_string())
                } else if e.is_connect() {
                    TransportError::ConnectionFailed(e.to_string())
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
        trace!(size, status = %status, "posted message");

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
        if !body.is_empty() {
            self.events.emit_message_received(body.len());
            if self
                .inbound_tx
                .send(TransportMessage::new(Bytes::from(body)))
                .await
                .is_err()
            {
                warn!("inbound channel closed, dropping response body");
            }
        }
        Ok(())
    }

    async fn receive(&self) -> TransportResult<Option<TransportMessage>> {
        let mut inbound_rx = self.inbound_rx.lock().await;
        Ok(inbound_rx.recv().await)
    }
}
