//! Connection retry behavior and request timeout semantics against a
//! scripted transport.

mod support;

use std::sync::Arc;
use std::time::{Duration, Instant};

use mooring_client::{
    ClientError, ClientEvent, ConnectionManager, ManagerConfig, McpConfig, SamplingManager,
    ServerDescriptor,
};
use mooring_protocol::RetryPolicy;
use mooring_transport::{Transport, TransportKind};
use support::MockTransport;

fn descriptor(name: &str) -> ServerDescriptor {
    let mut descriptor = ServerDescriptor::new(name, TransportKind::Http);
    descriptor.url = Some("http://mock.invalid".to_string());
    descriptor
}

fn fast_retry(max_attempts: u32) -> ManagerConfig {
    ManagerConfig {
        heartbeat_interval: Duration::from_secs(300),
        retry: RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.0,
            ..Default::default()
        },
    }
}

#[tokio::test]
async fn connect_retries_until_the_transport_accepts() {
    let mut server = descriptor("flaky");
    server.max_retries = 3;
    let config = McpConfig::new().with_server(server);
    let (manager, mut events) =
        ConnectionManager::with_settings(config, fast_retry(3), Arc::new(SamplingManager::new()));

    // Refuses twice, succeeds on the third attempt.
    let transport = Arc::new(MockTransport::new(2));
    let started = Instant::now();
    let info = manager
        .connect_with("flaky", Arc::clone(&transport) as Arc<dyn mooring_transport::Transport>)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(transport.connect_attempts(), 3);
    assert!(info.capabilities.is_some());
    // Backoff delays of 50ms then 100ms must have been observed.
    assert!(elapsed >= Duration::from_millis(150), "elapsed {elapsed:?}");

    // The retries surfaced as events before the connection established.
    let mut reconnecting = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, ClientEvent::Reconnecting { .. }) {
            reconnecting += 1;
        }
    }
    assert_eq!(reconnecting, 2);
    manager.disconnect_all().await;
}

#[tokio::test]
async fn retry_budget_exhaustion_fails_connect() {
    let mut server = descriptor("down");
    server.max_retries = 2;
    let config = McpConfig::new().with_server(server);
    let (manager, _events) =
        ConnectionManager::with_settings(config, fast_retry(2), Arc::new(SamplingManager::new()));

    let transport = Arc::new(MockTransport::new(10));
    let result = manager
        .connect_with("down", Arc::clone(&transport) as Arc<dyn mooring_transport::Transport>)
        .await;

    assert!(matches!(result, Err(ClientError::Transport(_))));
    // max_retries 2 allows the initial attempt plus two retries.
    assert_eq!(transport.connect_attempts(), 3);
    assert!(!manager.is_connected("down").await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_connects_keep_a_single_connection() {
    let server = descriptor("dup");
    let config = McpConfig::new().with_server(server);
    let (manager, _events) =
        ConnectionManager::with_settings(config, fast_retry(1), Arc::new(SamplingManager::new()));

    // Both transports accept, slowly enough that the two establishment
    // sequences overlap.
    let first = Arc::new(MockTransport::new(0).with_connect_delay(Duration::from_millis(100)));
    let second = Arc::new(MockTransport::new(0).with_connect_delay(Duration::from_millis(100)));
    let (a, b) = tokio::join!(
        manager.connect_with(
            "dup",
            Arc::clone(&first) as Arc<dyn mooring_transport::Transport>
        ),
        manager.connect_with(
            "dup",
            Arc::clone(&second) as Arc<dyn mooring_transport::Transport>
        ),
    );

    // Exactly one side wins; the loser learns the name is taken.
    assert_ne!(a.is_ok(), b.is_ok(), "a: {a:?}, b: {b:?}");
    let loser = if a.is_err() { a } else { b };
    assert!(matches!(loser, Err(ClientError::AlreadyConnected(_))));

    // The losing transport was closed, not leaked.
    let live = [&first, &second]
        .iter()
        .filter(|transport| transport.is_connected())
        .count();
    assert_eq!(live, 1);
    assert_eq!(manager.connections().await.len(), 1);
    manager.disconnect_all().await;
}

#[tokio::test]
async fn responses_surface_as_message_received_events() {
    let server = descriptor("obs");
    let config = McpConfig::new().with_server(server);
    let (manager, mut events) =
        ConnectionManager::with_settings(config, fast_retry(1), Arc::new(SamplingManager::new()));

    let transport = Arc::new(MockTransport::new(0));
    manager
        .connect_with("obs", transport as Arc<dyn mooring_transport::Transport>)
        .await
        .unwrap();
    manager.request("obs", "ping", None).await.unwrap();

    let mut sent = 0;
    let mut received = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            ClientEvent::MessageSent { method, .. } if method == "ping" => sent += 1,
            ClientEvent::MessageReceived { method, .. } if method == "ping" => received += 1,
            _ => {}
        }
    }
    assert_eq!(sent, 1);
    assert_eq!(received, 1);
    manager.disconnect_all().await;
}

#[tokio::test]
async fn timed_out_request_drops_the_late_response() {
    let mut server = descriptor("slow");
    server.request_timeout_ms = 100;
    let config = McpConfig::new().with_server(server);
    let (manager, _events) = ConnectionManager::with_settings(
        config,
        fast_retry(1),
        Arc::new(SamplingManager::new()),
    );

    let transport = Arc::new(
        MockTransport::new(0).with_slow_method("tools/list", Duration::from_millis(400)),
    );
    manager
        .connect_with("slow", transport as Arc<dyn mooring_transport::Transport>)
        .await
        .unwrap();

    let result = manager.list_tools("slow").await;
    assert!(matches!(result, Err(ClientError::Timeout { .. })));

    // The late response must not bleed into a later request: ping still
    // resolves with its own correlated response.
    tokio::time::sleep(Duration::from_millis(400)).await;
    let pong = manager.request("slow", "ping", None).await.unwrap();
    assert_eq!(pong, serde_json::json!({}));
    manager.disconnect_all().await;
}
