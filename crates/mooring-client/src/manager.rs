//! Connection manager: one live, initialized connection per server name.
//!
//! `connect` runs the full establishment sequence: build the transport
//! from the descriptor, open it, start the dispatcher read loop, perform
//! the `initialize` handshake, record negotiated capabilities, announce
//! `notifications/initialized`, and start the heartbeat. Failures are
//! classified and retried per [`RetryPolicy`] up to the descriptor's
//! retry budget.
//!
//! While connected, a heartbeat pings the server every ~30 seconds; a
//! failed ping tears the connection down and, when the descriptor allows
//! it, drives the same reconnection loop in the background.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use mooring_protocol::{
    methods, CallToolResult, ClientCapabilities, Implementation, InitializeRequest,
    InitializeResult, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, RequestId, RetryPolicy, PROTOCOL_VERSION,
};
use mooring_transport::{
    HttpConfig, HttpTransport, SseConfig, SseTransport, SubprocessConfig, SubprocessTransport,
    Transport, TransportMessage, WebSocketConfig, WebSocketTransport,
};

use crate::config::{McpConfig, ServerDescriptor};
use crate::connection::{ConnectionInfo, ConnectionState};
use crate::dispatcher::Dispatcher;
use crate::error::{ClientError, ClientResult};
use crate::events::{ClientEvent, ClientEventEmitter};
use crate::sampling::{self, SamplingManager};

/// Manager-wide settings, independent of any one descriptor.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Heartbeat ping cadence
    pub heartbeat_interval: Duration,
    /// Backoff policy for connection retries and reconnection
    pub retry: RetryPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

struct ConnectionHandle {
    descriptor: ServerDescriptor,
    transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    info: StdMutex<ConnectionInfo>,
    /// Request ids are locally unique per connection, starting at 1
    next_id: AtomicI64,
    heartbeat: StdMutex<Option<JoinHandle<()>>>,
}

impl ConnectionHandle {
    fn next_request_id(&self) -> RequestId {
        RequestId::from(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn set_state(&self, state: ConnectionState) {
        let mut info = self.info.lock().expect("info mutex poisoned");
        info.state = state;
        info.touch();
    }

    fn snapshot(&self) -> ConnectionInfo {
        self.info.lock().expect("info mutex poisoned").clone()
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("server", &self.descriptor.name)
            .field("kind", &self.descriptor.kind)
            .finish_non_exhaustive()
    }
}

struct ManagerInner {
    config: McpConfig,
    settings: ManagerConfig,
    connections: RwLock<HashMap<String, Arc<ConnectionHandle>>>,
    sampling: Arc<SamplingManager>,
    events: ClientEventEmitter,
}

/// Coordinates connections to every configured MCP server.
///
/// Cheaply cloneable; clones share the same connection table.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl ConnectionManager {
    /// A manager with default settings and a fresh sampling manager.
    /// Returns the event receiver the host consumes.
    pub fn new(config: McpConfig) -> (Self, mpsc::Receiver<ClientEvent>) {
        Self::with_settings(config, ManagerConfig::default(), Arc::new(SamplingManager::new()))
    }

    /// A manager with explicit settings and sampling manager.
    pub fn with_settings(
        config: McpConfig,
        settings: ManagerConfig,
        sampling: Arc<SamplingManager>,
    ) -> (Self, mpsc::Receiver<ClientEvent>) {
        let (events, receiver) = ClientEventEmitter::new();
        let manager = Self {
            inner: Arc::new(ManagerInner {
                config,
                settings,
                connections: RwLock::new(HashMap::new()),
                sampling,
                events,
            }),
        };
        (manager, receiver)
    }

    /// The sampling manager shared by every connection.
    pub fn sampling(&self) -> &Arc<SamplingManager> {
        &self.inner.sampling
    }

    /// Connect to a configured server, building the transport from its
    /// descriptor. Retries failed attempts per the retry policy.
    pub async fn connect(&self, name: &str) -> ClientResult<ConnectionInfo> {
        let descriptor = self.descriptor(name).await?;
        self.connect_loop(descriptor, None).await
    }

    /// Connect using a caller-supplied transport instead of one built from
    /// the descriptor. The descriptor still governs timeouts and retries.
    pub async fn connect_with(
        &self,
        name: &str,
        transport: Arc<dyn Transport>,
    ) -> ClientResult<ConnectionInfo> {
        let descriptor = self.descriptor(name).await?;
        self.connect_loop(descriptor, Some(transport)).await
    }

    /// Send a request and await its response, correlated by id.
    pub async fn request(
        &self,
        name: &str,
        method: &str,
        params: Option<Value>,
    ) -> ClientResult<Value> {
        let handle = self.handle(name).await?;
        self.inner.send_request(&handle, method, params).await
    }

    /// Fire-and-forget notification.
    pub async fn notify(
        &self,
        name: &str,
        method: &str,
        params: Option<Value>,
    ) -> ClientResult<()> {
        let handle = self.handle(name).await?;
        self.inner.send_notification(&handle, method, params).await
    }

    /// List the tools the server exposes.
    pub async fn list_tools(&self, name: &str) -> ClientResult<ListToolsResult> {
        let result = self.request(name, methods::TOOLS_LIST, None).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Invoke one of the server's tools.
    pub async fn call_tool(
        &self,
        name: &str,
        tool: &str,
        arguments: Option<Value>,
    ) -> ClientResult<CallToolResult> {
        let params = serde_json::json!({
            "name": tool,
            "arguments": arguments.unwrap_or(Value::Object(Default::default())),
        });
        let result = self.request(name, methods::TOOLS_CALL, Some(params)).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Tear down the named connection: stop the heartbeat, abort the
    /// dispatcher, reject pending requests, cancel in-flight sampling,
    /// and close the transport.
    pub async fn disconnect(&self, name: &str) -> ClientResult<()> {
        let handle = self
            .inner
            .connections
            .write()
            .await
            .remove(name)
            .ok_or_else(|| ClientError::NotConnected(name.to_string()))?;
        handle.set_state(ConnectionState::Disconnected);
        self.inner.teardown(&handle).await;
        info!(server = name, "disconnected");
        self.inner.events.emit(ClientEvent::ConnectionClosed {
            server: name.to_string(),
            reason: Some("disconnect requested".to_string()),
        });
        Ok(())
    }

    /// Disconnect every live connection.
    pub async fn disconnect_all(&self) {
        let names: Vec<String> = self.inner.connections.read().await.keys().cloned().collect();
        for name in names {
            if let Err(e) = self.disconnect(&name).await {
                debug!(server = %name, error = %e, "disconnect_all skipping");
            }
        }
    }

    /// Snapshot of one connection, if live.
    pub async fn connection_info(&self, name: &str) -> Option<ConnectionInfo> {
        let connections = self.inner.connections.read().await;
        connections.get(name).map(|handle| handle.snapshot())
    }

    /// Snapshots of every live connection.
    pub async fn connections(&self) -> Vec<ConnectionInfo> {
        let connections = self.inner.connections.read().await;
        connections.values().map(|handle| handle.snapshot()).collect()
    }

    /// Whether the named connection is live and past its handshake.
    pub async fn is_connected(&self, name: &str) -> bool {
        matches!(
            self.connection_info(name).await.map(|info| info.state),
            Some(ConnectionState::Connected)
        )
    }

    async fn descriptor(&self, name: &str) -> ClientResult<ServerDescriptor> {
        if self.inner.connections.read().await.contains_key(name) {
            return Err(ClientError::AlreadyConnected(name.to_string()));
        }
        let descriptor = self
            .inner
            .config
            .get(name)
            .ok_or_else(|| ClientError::UnknownServer(name.to_string()))?;
        if !descriptor.enabled {
            return Err(ClientError::ServerDisabled(name.to_string()));
        }
        descriptor.validate()?;
        Ok(descriptor.clone())
    }

    async fn handle(&self, name: &str) -> ClientResult<Arc<ConnectionHandle>> {
        let connections = self.inner.connections.read().await;
        connections
            .get(name)
            .cloned()
            .ok_or_else(|| ClientError::NotConnected(name.to_string()))
    }

    async fn connect_loop(
        &self,
        descriptor: ServerDescriptor,
        fixed_transport: Option<Arc<dyn Transport>>,
    ) -> ClientResult<ConnectionInfo> {
        let policy = self.inner.retry_policy(&descriptor);
        let mut attempt = 1u32;
        loop {
            let transport = match &fixed_transport {
                Some(transport) => Arc::clone(transport),
                None => build_transport(&descriptor)?,
            };
            match self.inner.establish(&descriptor, transport).await {
                Ok(info) => return Ok(info),
                Err(e) => {
                    let classified = e.classify();
                    self.inner.events.emit(ClientEvent::ConnectionError {
                        server: descriptor.name.clone(),
                        error: classified.clone(),
                    });
                    if !policy.should_retry(&classified, attempt) {
                        warn!(server = %descriptor.name, attempt, error = %e, "connect failed");
                        return Err(e);
                    }
                    let delay = policy.delay(&classified, attempt);
                    debug!(
                        server = %descriptor.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "connect attempt failed, retrying"
                    );
                    self.inner.events.emit(ClientEvent::Reconnecting {
                        server: descriptor.name.clone(),
                        attempt,
                    });
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager").finish_non_exhaustive()
    }
}

impl ManagerInner {
    fn retry_policy(&self, descriptor: &ServerDescriptor) -> RetryPolicy {
        RetryPolicy {
            max_attempts: descriptor.max_retries,
            ..self.settings.retry.clone()
        }
    }

    /// One full establishment attempt: transport connect, dispatcher,
    /// handshake, heartbeat, registration.
    async fn establish(
        self: &Arc<Self>,
        descriptor: &ServerDescriptor,
        transport: Arc<dyn Transport>,
    ) -> ClientResult<ConnectionInfo> {
        transport.connect().await?;

        let (request_tx, request_rx) = mpsc::channel(16);
        let (notification_tx, notification_rx) = mpsc::channel(64);
        let dispatcher = Dispatcher::spawn(Arc::clone(&transport), request_tx, notification_tx);

        let handle = Arc::new(ConnectionHandle {
            descriptor: descriptor.clone(),
            transport,
            dispatcher,
            info: StdMutex::new(ConnectionInfo::new(&descriptor.name, descriptor.kind)),
            next_id: AtomicI64::new(1),
            heartbeat: StdMutex::new(None),
        });

        match self.handshake(&handle).await {
            Ok(init) => {
                // Registration re-checks occupancy under the write lock:
                // a concurrent connect for the same name may have finished
                // while our handshake was in flight. The registered
                // connection wins; this one is discarded.
                let mut connections = self.connections.write().await;
                if connections.contains_key(&descriptor.name) {
                    drop(connections);
                    debug!(server = %descriptor.name, "lost the connect race, discarding duplicate");
                    handle.dispatcher.shutdown();
                    handle.dispatcher.reject_all();
                    if let Err(close_err) = handle.transport.disconnect().await {
                        debug!(error = %close_err, "transport close after lost connect race");
                    }
                    return Err(ClientError::AlreadyConnected(descriptor.name.clone()));
                }
                {
                    let mut info = handle.info.lock().expect("info mutex poisoned");
                    info.capabilities = Some(init.capabilities);
                    info.state = ConnectionState::Connected;
                    info.touch();
                }
                self.spawn_server_request_task(&handle, request_rx);
                self.spawn_notification_task(descriptor.name.clone(), notification_rx);
                self.spawn_heartbeat(&handle);
                connections.insert(descriptor.name.clone(), Arc::clone(&handle));
                drop(connections);
                info!(
                    server = %descriptor.name,
                    kind = %descriptor.kind,
                    protocol = %init.protocol_version,
                    "connection established"
                );
                self.events.emit(ClientEvent::ConnectionEstablished {
                    server: descriptor.name.clone(),
                });
                Ok(handle.snapshot())
            }
            Err(e) => {
                handle.dispatcher.shutdown();
                if let Err(close_err) = handle.transport.disconnect().await {
                    debug!(error = %close_err, "transport close after failed handshake");
                }
                Err(e)
            }
        }
    }

    /// `initialize` → record capabilities → `notifications/initialized`.
    async fn handshake(self: &Arc<Self>, handle: &Arc<ConnectionHandle>) -> ClientResult<InitializeResult> {
        let request = InitializeRequest {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::with_sampling(),
            client_info: Implementation {
                name: "mooring".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        let result = self
            .send_request(handle, methods::INITIALIZE, Some(serde_json::to_value(&request)?))
            .await?;
        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| ClientError::Handshake(format!("invalid initialize result: {e}")))?;
        if init.protocol_version != PROTOCOL_VERSION {
            warn!(
                server = %handle.descriptor.name,
                negotiated = %init.protocol_version,
                requested = PROTOCOL_VERSION,
                "server negotiated a different protocol version"
            );
        }
        self.send_notification(handle, methods::INITIALIZED, None).await?;
        Ok(init)
    }

    async fn send_request(
        self: &Arc<Self>,
        handle: &Arc<ConnectionHandle>,
        method: &str,
        params: Option<Value>,
    ) -> ClientResult<Value> {
        let id = handle.next_request_id();
        let receiver = handle.dispatcher.wait_for(id.clone());
        let request = JsonRpcRequest::new(method, params, id.clone());
        let frame = TransportMessage::new(Bytes::from(serde_json::to_vec(&request)?));

        if let Err(e) = handle.transport.send(frame).await {
            handle.dispatcher.remove_waiter(&id);
            return Err(e.into());
        }
        trace!(server = %handle.descriptor.name, method, %id, "request sent");
        self.events.emit(ClientEvent::MessageSent {
            server: handle.descriptor.name.clone(),
            method: method.to_string(),
        });

        let timeout = handle.descriptor.request_timeout();
        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(response)) => {
                {
                    let mut info = handle.info.lock().expect("info mutex poisoned");
                    info.touch();
                }
                self.events.emit(ClientEvent::MessageReceived {
                    server: handle.descriptor.name.clone(),
                    method: method.to_string(),
                });
                match response.error() {
                    Some(error) => Err(ClientError::from_rpc(error, &handle.descriptor.name)),
                    None => Ok(response.result().cloned().unwrap_or(Value::Null)),
                }
            }
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                // Removing the waiter here is what drops a late response
                // instead of resolving a request that already failed.
                handle.dispatcher.remove_waiter(&id);
                warn!(server = %handle.descriptor.name, method, %id, "request timed out");
                Err(ClientError::Timeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    async fn send_notification(
        self: &Arc<Self>,
        handle: &Arc<ConnectionHandle>,
        method: &str,
        params: Option<Value>,
    ) -> ClientResult<()> {
        let notification = JsonRpcNotification::new(method, params);
        let frame = TransportMessage::new(Bytes::from(serde_json::to_vec(&notification)?));
        handle.transport.send(frame).await?;
        self.events.emit(ClientEvent::MessageSent {
            server: handle.descriptor.name.clone(),
            method: method.to_string(),
        });
        Ok(())
    }

    /// Stop everything owned by a handle. Idempotent; errors are logged,
    /// never propagated.
    async fn teardown(&self, handle: &Arc<ConnectionHandle>) {
        if let Some(task) = handle.heartbeat.lock().expect("heartbeat mutex poisoned").take() {
            task.abort();
        }
        handle.dispatcher.shutdown();
        handle.dispatcher.reject_all();
        let cancelled = self.sampling.cancel_for_server(&handle.descriptor.name);
        if cancelled > 0 {
            debug!(
                server = %handle.descriptor.name,
                cancelled,
                "cancelled sampling during teardown"
            );
        }
        if let Err(e) = handle.transport.disconnect().await {
            debug!(server = %handle.descriptor.name, error = %e, "transport close during teardown");
        }
    }

    fn spawn_heartbeat(self: &Arc<Self>, handle: &Arc<ConnectionHandle>) {
        let inner = Arc::downgrade(self);
        let handle_weak = Arc::downgrade(handle);
        let interval = self.settings.heartbeat_interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick completes immediately
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else { return };
                let Some(handle) = handle_weak.upgrade() else { return };
                match inner.send_request(&handle, methods::PING, None).await {
                    Ok(_) => {
                        trace!(server = %handle.descriptor.name, "heartbeat ok");
                    }
                    Err(e) => {
                        warn!(server = %handle.descriptor.name, error = %e, "heartbeat failed");
                        inner.events.emit(ClientEvent::HeartbeatFailed {
                            server: handle.descriptor.name.clone(),
                        });
                        let name = handle.descriptor.name.clone();
                        // Failure handling runs on its own task so tearing
                        // down this heartbeat cannot cancel it midway.
                        tokio::spawn(async move {
                            inner.handle_connection_failure(&name, e).await;
                        });
                        return;
                    }
                }
            }
        });
        *handle.heartbeat.lock().expect("heartbeat mutex poisoned") = Some(task);
    }

    async fn handle_connection_failure(self: &Arc<Self>, name: &str, error: ClientError) {
        let Some(handle) = self.connections.write().await.remove(name) else {
            return;
        };
        handle.set_state(ConnectionState::Error);
        self.events.emit(ClientEvent::ConnectionError {
            server: name.to_string(),
            error: error.classify(),
        });
        self.teardown(&handle).await;

        if handle.descriptor.auto_reconnect {
            self.reconnect(handle.descriptor.clone()).await;
        } else {
            self.events.emit(ClientEvent::ConnectionClosed {
                server: name.to_string(),
                reason: Some("connection failed".to_string()),
            });
        }
    }

    /// Background reconnection after a live connection failed. Each cycle
    /// starts from attempt 1, so a connection that recovers and later
    /// fails again gets a fresh retry budget.
    async fn reconnect(self: &Arc<Self>, descriptor: ServerDescriptor) {
        let policy = self.retry_policy(&descriptor);
        let mut attempt = 1u32;
        loop {
            self.events.emit(ClientEvent::Reconnecting {
                server: descriptor.name.clone(),
                attempt,
            });
            let outcome = match build_transport(&descriptor) {
                Ok(transport) => self.establish(&descriptor, transport).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(_) => {
                    info!(server = %descriptor.name, attempt, "reconnected");
                    return;
                }
                Err(e) => {
                    let classified = e.classify();
                    if !policy.should_retry(&classified, attempt) {
                        warn!(
                            server = %descriptor.name,
                            attempts = attempt,
                            "reconnection attempts exhausted"
                        );
                        self.events.emit(ClientEvent::ConnectionClosed {
                            server: descriptor.name.clone(),
                            reason: Some("reconnection attempts exhausted".to_string()),
                        });
                        return;
                    }
                    let delay = policy.delay(&classified, attempt);
                    debug!(
                        server = %descriptor.name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "reconnect attempt failed"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    fn spawn_server_request_task(
        self: &Arc<Self>,
        handle: &Arc<ConnectionHandle>,
        mut requests: mpsc::Receiver<JsonRpcRequest>,
    ) {
        let inner = Arc::downgrade(self);
        let handle_weak = Arc::downgrade(handle);
        tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                let Some(inner) = inner.upgrade() else { return };
                let Some(handle) = handle_weak.upgrade() else { return };
                inner.handle_server_request(&handle, request).await;
            }
        });
    }

    /// Process one server-initiated request. Only `sampling/createMessage`
    /// is supported; anything else gets method-not-found.
    async fn handle_server_request(
        self: &Arc<Self>,
        handle: &Arc<ConnectionHandle>,
        request: JsonRpcRequest,
    ) {
        let server = handle.descriptor.name.clone();
        self.events.emit(ClientEvent::MessageReceived {
            server: server.clone(),
            method: request.method.clone(),
        });

        let response = if request.method == methods::SAMPLING_CREATE_MESSAGE {
            match request
                .params
                .clone()
                .map(serde_json::from_value)
                .transpose()
            {
                Ok(Some(create)) => {
                    let id = sampling::request_id(&server);
                    self.events.emit(ClientEvent::SamplingStarted {
                        server: server.clone(),
                        id: id.clone(),
                    });
                    match self.sampling.handle_with_id(&server, &id, create).await {
                        Ok(result) => {
                            self.events.emit(ClientEvent::SamplingCompleted {
                                server: server.clone(),
                                id,
                            });
                            match serde_json::to_value(result) {
                                Ok(value) => JsonRpcResponse::success(value, request.id),
                                Err(e) => JsonRpcResponse::error_response(
                                    JsonRpcError::internal_error(&e.to_string()),
                                    request.id,
                                ),
                            }
                        }
                        Err(e) => {
                            self.events.emit(ClientEvent::SamplingFailed {
                                server: server.clone(),
                                id,
                                reason: e.to_string(),
                            });
                            JsonRpcResponse::error_response(
                                JsonRpcError::internal_error(&e.to_string()),
                                request.id,
                            )
                        }
                    }
                }
                Ok(None) | Err(_) => JsonRpcResponse::error_response(
                    JsonRpcError::invalid_params("expected createMessage params"),
                    request.id,
                ),
            }
        } else {
            JsonRpcResponse::error_response(
                JsonRpcError::method_not_found(&request.method),
                request.id,
            )
        };

        match serde_json::to_vec(&response) {
            Ok(payload) => {
                if let Err(e) = handle
                    .transport
                    .send(TransportMessage::new(Bytes::from(payload)))
                    .await
                {
                    warn!(server = %server, error = %e, "failed to send sampling response");
                }
            }
            Err(e) => warn!(server = %server, error = %e, "failed to serialize response"),
        }
    }

    fn spawn_notification_task(
        self: &Arc<Self>,
        server: String,
        mut notifications: mpsc::Receiver<JsonRpcNotification>,
    ) {
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(notification) = notifications.recv().await {
                events.emit(ClientEvent::MessageReceived {
                    server: server.clone(),
                    method: notification.method,
                });
            }
        });
    }
}

/// Build the transport a descriptor asks for.
fn build_transport(descriptor: &ServerDescriptor) -> ClientResult<Arc<dyn Transport>> {
    let headers: Vec<(String, String)> = descriptor
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let url = descriptor.url.clone().unwrap_or_default();

    let transport: Arc<dyn Transport> = match descriptor.kind {
        mooring_transport::TransportKind::Subprocess => {
            Arc::new(SubprocessTransport::new(SubprocessConfig {
                command: descriptor.command.clone().unwrap_or_default(),
                args: descriptor.args.clone(),
                env: descriptor
                    .env
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                ..Default::default()
            }))
        }
        mooring_transport::TransportKind::Http => Arc::new(HttpTransport::new(HttpConfig {
            url,
            auth_token: descriptor.auth_token.clone(),
            headers,
            request_timeout: descriptor.request_timeout(),
            ..Default::default()
        })?),
        mooring_transport::TransportKind::Sse => Arc::new(SseTransport::new(SseConfig {
            base_url: url,
            auth_token: descriptor.auth_token.clone(),
            headers,
            request_timeout: descriptor.request_timeout(),
            ..Default::default()
        })?),
        mooring_transport::TransportKind::WebSocket => {
            Arc::new(WebSocketTransport::new(WebSocketConfig {
                url,
                ..Default::default()
            }))
        }
    };
    Ok(transport)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mooring_transport::TransportKind;
    use pretty_assertions::assert_eq;

    fn subprocess_descriptor(name: &str) -> ServerDescriptor {
        let mut descriptor = ServerDescriptor::new(name, TransportKind::Subprocess);
        descriptor.command = Some("mcp-server".to_string());
        descriptor
    }

    #[tokio::test]
    async fn unknown_server_is_rejected() {
        let (manager, _events) = ConnectionManager::new(McpConfig::new());
        let result = manager.connect("ghost").await;
        assert!(matches!(result, Err(ClientError::UnknownServer(_))));
    }

    #[tokio::test]
    async fn disabled_server_is_rejected() {
        let mut descriptor = subprocess_descriptor("off");
        descriptor.enabled = false;
        let config = McpConfig::new().with_server(descriptor);
        let (manager, _events) = ConnectionManager::new(config);
        let result = manager.connect("off").await;
        assert!(matches!(result, Err(ClientError::ServerDisabled(_))));
    }

    #[tokio::test]
    async fn request_requires_a_connection() {
        let config = McpConfig::new().with_server(subprocess_descriptor("srv"));
        let (manager, _events) = ConnectionManager::new(config);
        let result = manager.request("srv", methods::PING, None).await;
        assert!(matches!(result, Err(ClientError::NotConnected(_))));
    }

    #[tokio::test]
    async fn build_transport_covers_every_kind() {
        let mut subprocess = subprocess_descriptor("a");
        subprocess.args = vec!["--stdio".to_string()];
        assert_eq!(
            build_transport(&subprocess).unwrap().kind(),
            TransportKind::Subprocess
        );

        for kind in [
            TransportKind::Http,
            TransportKind::Sse,
            TransportKind::WebSocket,
        ] {
            let mut descriptor = ServerDescriptor::new("b", kind);
            descriptor.url = Some("http://localhost:3000".to_string());
            assert_eq!(build_transport(&descriptor).unwrap().kind(), kind);
        }
    }

    #[tokio::test]
    async fn connection_listing_is_empty_without_connections() {
        let (manager, _events) = ConnectionManager::new(McpConfig::new());
        assert!(manager.connections().await.is_empty());
        assert!(!manager.is_connected("anything").await);
    }
}
