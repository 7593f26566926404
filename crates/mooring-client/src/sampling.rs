//! Server-initiated sampling: the reverse RPC direction.
//!
//! MCP servers may ask the client to run an LLM completion via
//! `sampling/createMessage`. The [`SamplingManager`] validates the request
//! before any handler runs, enforces a global in-flight cap, races the
//! registered handler against a timeout and external cancellation, and
//! validates the result before it goes back over the wire. Whatever the
//! outcome, the request is always deregistered from the in-flight set.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::{debug, warn};

use mooring_protocol::{
    Content, CreateMessageRequest, CreateMessageResult, Role, SamplingMessage,
};

use crate::error::{ClientError, ClientResult};

/// Default handler timeout.
pub const DEFAULT_SAMPLING_TIMEOUT: Duration = Duration::from_secs(60);

/// Default cap on concurrently running sampling requests.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 5;

/// Handler for `sampling/createMessage` requests.
#[async_trait]
pub trait SamplingHandler: Send + Sync + std::fmt::Debug {
    /// Produce a completion for the given request.
    async fn handle_create_message(
        &self,
        request: CreateMessageRequest,
    ) -> Result<CreateMessageResult, Box<dyn std::error::Error + Send + Sync>>;
}

#[derive(Debug)]
struct InFlight {
    server: String,
    cancel: Arc<Notify>,
}

/// Coordinates sampling handlers across all connected servers.
#[derive(Debug)]
pub struct SamplingManager {
    handlers: DashMap<String, Arc<dyn SamplingHandler>>,
    in_flight: DashMap<String, InFlight>,
    /// Strict occupancy count; slots are reserved here before the map
    /// insert so concurrent requests cannot race past the cap.
    active: AtomicUsize,
    max_in_flight: usize,
    timeout: Duration,
}

impl SamplingManager {
    /// A manager with the default cap and timeout.
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_IN_FLIGHT, DEFAULT_SAMPLING_TIMEOUT)
    }

    /// A manager with an explicit in-flight cap and handler timeout.
    pub fn with_limits(max_in_flight: usize, timeout: Duration) -> Self {
        Self {
            handlers: DashMap::new(),
            in_flight: DashMap::new(),
            active: AtomicUsize::new(0),
            max_in_flight: max_in_flight.max(1),
            timeout,
        }
    }

    /// Register the handler used for requests from `server`.
    pub fn register(&self, server: impl Into<String>, handler: Arc<dyn SamplingHandler>) {
        let server = server.into();
        debug!(server = %server, "sampling handler registered");
        self.handlers.insert(server, handler);
    }

    /// Remove the handler for `server`, returning whether one existed.
    pub fn unregister(&self, server: &str) -> bool {
        self.handlers.remove(server).is_some()
    }

    /// Number of sampling requests currently running.
    pub fn in_flight_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Handle one sampling request from `server`.
    ///
    /// Returns the generated id alongside the result so callers can
    /// correlate lifecycle events.
    pub async fn handle(
        &self,
        server: &str,
        request: CreateMessageRequest,
    ) -> (String, ClientResult<CreateMessageResult>) {
        let id = request_id(server);
        let result = self.handle_with_id(server, &id, request).await;
        (id, result)
    }

    /// Like [`Self::handle`] but with a caller-generated id from
    /// [`request_id`], so lifecycle events can reference the id before
    /// the handler starts.
    pub async fn handle_with_id(
        &self,
        server: &str,
        id: &str,
        request: CreateMessageRequest,
    ) -> ClientResult<CreateMessageResult> {
        // Parameter validation happens before the handler is consulted,
        // before the request even counts against the in-flight cap.
        validate_request(&request)?;

        let handler = self
            .handlers
            .get(server)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                ClientError::Sampling(format!("no sampling handler registered for '{server}'"))
            })?;

        // Compare-exchange reservation: a plain length check against the
        // map would let two requests pass simultaneously and exceed the cap.
        let mut active = self.active.load(Ordering::Acquire);
        loop {
            if active >= self.max_in_flight {
                warn!(server, cap = self.max_in_flight, "sampling request rejected at capacity");
                return Err(ClientError::Sampling(format!(
                    "too many concurrent sampling requests (cap {})",
                    self.max_in_flight
                )));
            }
            match self.active.compare_exchange(
                active,
                active + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => active = current,
            }
        }

        let cancel = Arc::new(Notify::new());
        self.in_flight.insert(
            id.to_string(),
            InFlight {
                server: server.to_string(),
                cancel: Arc::clone(&cancel),
            },
        );
        debug!(server, id, in_flight = active + 1, "sampling request started");

        let outcome = tokio::select! {
            result = handler.handle_create_message(request) => match result {
                Ok(result) => validate_result(&result).map(|()| result),
                Err(e) => Err(ClientError::Sampling(format!("handler failed: {e}"))),
            },
            () = tokio::time::sleep(self.timeout) => Err(ClientError::Sampling(format!(
                "handler timed out after {:?}",
                self.timeout
            ))),
            () = cancel.notified() => Err(ClientError::Sampling("request cancelled".to_string())),
        };

        self.in_flight.remove(id);
        self.active.fetch_sub(1, Ordering::AcqRel);
        outcome
    }

    /// Cancel a single in-flight request by id.
    pub fn cancel(&self, id: &str) -> bool {
        match self.in_flight.get(id) {
            Some(entry) => {
                debug!(id, "cancelling sampling request");
                entry.cancel.notify_waiters();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight request belonging to `server`. Used at
    /// connection teardown.
    pub fn cancel_for_server(&self, server: &str) -> usize {
        let mut cancelled = 0;
        for entry in self.in_flight.iter() {
            if entry.value().server == server {
                entry.value().cancel.notify_waiters();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            debug!(server, cancelled, "cancelled in-flight sampling requests");
        }
        cancelled
    }
}

impl Default for SamplingManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a sampling request id: server name, millisecond timestamp,
/// short random suffix.
pub fn request_id(server: &str) -> String {
    format!(
        "{server}-{}-{:04x}",
        Utc::now().timestamp_millis(),
        fastrand::u16(..)
    )
}

fn validate_request(request: &CreateMessageRequest) -> ClientResult<()> {
    if request.messages.is_empty() {
        return Err(ClientError::Sampling("messages cannot be empty".to_string()));
    }
    if request.max_tokens == 0 {
        return Err(ClientError::Sampling("max_tokens must be greater than 0".to_string()));
    }
    if let Some(preferences) = &request.model_preferences {
        for (name, priority) in [
            ("costPriority", preferences.cost_priority),
            ("speedPriority", preferences.speed_priority),
            ("intelligencePriority", preferences.intelligence_priority),
        ] {
            if let Some(value) = priority {
                if !(0.0..=1.0).contains(&value) {
                    return Err(ClientError::Sampling(format!(
                        "{name} must be within [0, 1], got {value}"
                    )));
                }
            }
        }
    }
    Ok(())
}

fn validate_result(result: &CreateMessageResult) -> ClientResult<()> {
    if result.role != Role::Assistant {
        return Err(ClientError::Sampling(format!(
            "result role must be assistant, got {:?}",
            result.role
        )));
    }
    if result.content.is_empty() {
        return Err(ClientError::Sampling("result content is empty".to_string()));
    }
    if result.model.is_empty() {
        return Err(ClientError::Sampling("result model is empty".to_string()));
    }
    Ok(())
}

/// Test handler that echoes the last user message back as the assistant.
#[derive(Debug, Default)]
pub struct EchoSamplingHandler;

#[async_trait]
impl SamplingHandler for EchoSamplingHandler {
    async fn handle_create_message(
        &self,
        request: CreateMessageRequest,
    ) -> Result<CreateMessageResult, Box<dyn std::error::Error + Send + Sync>> {
        let text = request
            .messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .and_then(|message| message.content.as_text())
            .unwrap_or("(no user message)")
            .to_string();
        Ok(CreateMessageResult {
            role: Role::Assistant,
            content: Content::text(format!("echo: {text}")),
            model: "echo".to_string(),
            stop_reason: Some("endTurn".to_string()),
        })
    }
}

/// Convenience constructor for a minimal valid request.
pub fn simple_request(text: impl Into<String>, max_tokens: u32) -> CreateMessageRequest {
    CreateMessageRequest {
        messages: vec![SamplingMessage::user(text)],
        max_tokens,
        system_prompt: None,
        temperature: None,
        model_preferences: None,
        include_context: None,
        stop_sequences: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mooring_protocol::ModelPreferences;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn echo_handler_round_trip() {
        let manager = SamplingManager::new();
        manager.register("test", Arc::new(EchoSamplingHandler));

        let (_, result) = manager.handle("test", simple_request("hello", 100)).await;
        let result = result.unwrap();
        assert_eq!(result.role, Role::Assistant);
        assert_eq!(result.content.as_text(), Some("echo: hello"));
        assert_eq!(manager.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn empty_messages_rejected_before_handler() {
        let manager = SamplingManager::new();
        manager.register("test", Arc::new(EchoSamplingHandler));

        let mut request = simple_request("x", 100);
        request.messages.clear();
        let (_, result) = manager.handle("test", request).await;
        assert!(matches!(result, Err(ClientError::Sampling(_))));
        assert_eq!(manager.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn out_of_range_priority_rejected() {
        let manager = SamplingManager::new();
        manager.register("test", Arc::new(EchoSamplingHandler));

        let mut request = simple_request("x", 100);
        request.model_preferences = Some(ModelPreferences {
            hints: None,
            cost_priority: Some(1.5),
            speed_priority: None,
            intelligence_priority: None,
        });
        let (_, result) = manager.handle("test", request).await;
        assert!(matches!(result, Err(ClientError::Sampling(_))));
    }

    #[tokio::test]
    async fn missing_handler_is_an_error() {
        let manager = SamplingManager::new();
        let (_, result) = manager.handle("ghost", simple_request("x", 100)).await;
        assert!(matches!(result, Err(ClientError::Sampling(_))));
    }

    #[tokio::test]
    async fn invalid_result_is_rejected() {
        #[derive(Debug)]
        struct BadModel;

        #[async_trait]
        impl SamplingHandler for BadModel {
            async fn handle_create_message(
                &self,
                _request: CreateMessageRequest,
            ) -> Result<CreateMessageResult, Box<dyn std::error::Error + Send + Sync>>
            {
                Ok(CreateMessageResult {
                    role: Role::Assistant,
                    content: Content::text("ok"),
                    model: String::new(),
                    stop_reason: None,
                })
            }
        }

        let manager = SamplingManager::new();
        manager.register("test", Arc::new(BadModel));
        let (_, result) = manager.handle("test", simple_request("x", 10)).await;
        assert!(matches!(result, Err(ClientError::Sampling(_))));
        assert_eq!(manager.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn cancel_interrupts_a_running_handler() {
        #[derive(Debug)]
        struct Stuck;

        #[async_trait]
        impl SamplingHandler for Stuck {
            async fn handle_create_message(
                &self,
                _request: CreateMessageRequest,
            ) -> Result<CreateMessageResult, Box<dyn std::error::Error + Send + Sync>>
            {
                futures::future::pending().await
            }
        }

        let manager = Arc::new(SamplingManager::new());
        manager.register("test", Arc::new(Stuck));

        let worker = Arc::clone(&manager);
        let task = tokio::spawn(async move {
            worker.handle("test", simple_request("x", 10)).await
        });
        // Wait until the request registers, then cancel it by server.
        for _ in 0..100 {
            if manager.in_flight_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(manager.cancel_for_server("test"), 1);

        let (_, result) = task.await.unwrap();
        assert!(matches!(result, Err(ClientError::Sampling(_))));
        assert_eq!(manager.in_flight_count(), 0);
    }

    #[test]
    fn ids_embed_the_server_name() {
        let id = request_id("github");
        assert!(id.starts_with("github-"));
        assert_ne!(request_id("github"), request_id("github"));
    }
}
