//! Message routing: the single consumer of `transport.receive()`.
//!
//! One dispatcher runs per connection. Its background task reads every
//! inbound frame and routes by JSON-RPC shape: responses resolve the
//! oneshot waiter registered under their id, server-initiated requests go
//! to the sampling channel, notifications go to the event surface.
//! Centralizing the read loop means responses are correlated strictly by
//! id, never by arrival order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Notify};
use tracing::{debug, info, trace, warn};

use mooring_protocol::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
use mooring_transport::{Transport, TransportState};

/// Routes inbound frames for one connection.
#[derive(Debug)]
pub struct Dispatcher {
    /// Pending request ids and the channels their responses resolve
    waiters: Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>,
    shutdown: Notify,
}

impl Dispatcher {
    /// Create a dispatcher and start its read loop on `transport`.
    ///
    /// Server-initiated requests are forwarded to `server_requests`,
    /// notifications to `notifications`. The loop exits on shutdown or
    /// when the transport reports end-of-stream; either way every pending
    /// waiter is rejected.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        server_requests: mpsc::Sender<JsonRpcRequest>,
        notifications: mpsc::Sender<JsonRpcNotification>,
    ) -> Arc<Self> {
        let dispatcher = Arc::new(Self {
            waiters: Mutex::new(HashMap::new()),
            shutdown: Notify::new(),
        });
        let this = Arc::clone(&dispatcher);

        tokio::spawn(async move {
            debug!("dispatcher read loop started");
            let mut consecutive_errors = 0u32;
            loop {
                tokio::select! {
                    () = this.shutdown.notified() => {
                        debug!("dispatcher shutting down");
                        break;
                    }
                    result = transport.receive() => match result {
                        Ok(Some(message)) => {
                            consecutive_errors = 0;
                            this.route(&message.payload, &server_requests, &notifications).await;
                        }
                        Ok(None) => {
                            info!("transport closed, dispatcher stopping");
                            break;
                        }
                        Err(e) => {
                            consecutive_errors += 1;
                            warn!(error = %e, consecutive_errors, "transport receive error");
                            if matches!(
                                transport.state(),
                                TransportState::Disconnected | TransportState::Failed { .. }
                            ) {
                                break;
                            }
                            let backoff = 100u64
                                .saturating_mul(2u64.saturating_pow(consecutive_errors.min(5)));
                            tokio::time::sleep(Duration::from_millis(backoff)).await;
                        }
                    }
                }
            }
            this.reject_all();
            debug!("dispatcher read loop terminated");
        });

        dispatcher
    }

    /// Register interest in the response for `id`. Must be called before
    /// the request is sent or the response can race past.
    pub fn wait_for(&self, id: RequestId) -> oneshot::Receiver<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .expect("waiters mutex poisoned")
            .insert(id, tx);
        rx
    }

    /// Remove the waiter for `id`, returning whether one was present.
    ///
    /// Called on request timeout; removal is atomic with routing, so a
    /// response arriving after this point is dropped rather than resolving
    /// a request that already failed.
    pub fn remove_waiter(&self, id: &RequestId) -> bool {
        self.waiters
            .lock()
            .expect("waiters mutex poisoned")
            .remove(id)
            .is_some()
    }

    /// Number of requests still awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.waiters.lock().expect("waiters mutex poisoned").len()
    }

    /// Drop every pending waiter. Receivers observe a closed channel,
    /// which the manager maps to a connection-closed error.
    pub fn reject_all(&self) {
        let mut waiters = self.waiters.lock().expect("waiters mutex poisoned");
        if !waiters.is_empty() {
            debug!(pending = waiters.len(), "rejecting all pending requests");
        }
        waiters.clear();
    }

    /// Stop the read loop.
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    async fn route(
        &self,
        payload: &[u8],
        server_requests: &mpsc::Sender<JsonRpcRequest>,
        notifications: &mpsc::Sender<JsonRpcNotification>,
    ) {
        let message: JsonRpcMessage = match serde_json::from_slice(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "dropping frame that is not valid JSON-RPC");
                return;
            }
        };

        match message {
            JsonRpcMessage::Response(response) => {
                let Some(id) = response.id.as_request_id().cloned() else {
                    warn!("dropping response with null id");
                    return;
                };
                let waiter = self
                    .waiters
                    .lock()
                    .expect("waiters mutex poisoned")
                    .remove(&id);
                match waiter {
                    Some(tx) => {
                        trace!(%id, "routing response to waiter");
                        // The receiver may have timed out and gone away.
                        let _ = tx.send(response);
                    }
                    None => {
                        warn!(%id, "dropping response for unknown or expired request id");
                    }
                }
            }
            JsonRpcMessage::Request(request) => {
                debug!(method = %request.method, id = %request.id, "server-initiated request");
                if server_requests.send(request).await.is_err() {
                    warn!("server request channel closed, dropping request");
                }
            }
            JsonRpcMessage::Notification(notification) => {
                trace!(method = %notification.method, "server notification");
                if notifications.send(notification).await.is_err() {
                    debug!("notification channel closed, dropping notification");
                }
            }
        }
    }
}
