//! Reconnection replay over a real socket: the server drops the
//! connection after five frames, acknowledges the second on the next
//! upgrade, and must see exactly the last three again, in order.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;

use mooring_transport::{
    ReconnectConfig, Transport, TransportMessage, WebSocketConfig, WebSocketTransport,
};

#[tokio::test]
async fn unacknowledged_frames_replay_in_order_after_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let frames: Vec<TransportMessage> = (1..=5)
        .map(|n| {
            TransportMessage::tagged(Bytes::from(format!(
                r#"{{"jsonrpc":"2.0","method":"note","params":{{"n":{n}}}}}"#
            )))
        })
        .collect();
    let payloads: Vec<String> = frames
        .iter()
        .map(|frame| String::from_utf8(frame.payload.to_vec()).unwrap())
        .collect();
    let acked_tag = frames[1].tag.unwrap().to_string();
    let last_tag = frames[4].tag.unwrap().to_string();

    let server = tokio::spawn(async move {
        // First connection: read five frames, then drop the socket
        // without a close frame.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let mut first = Vec::new();
        while first.len() < 5 {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => first.push(text),
                Some(Ok(_)) => {}
                other => panic!("first stream ended early: {other:?}"),
            }
        }
        drop(ws);

        // Second connection: capture the client's last-sent tag from the
        // upgrade request and acknowledge the second frame.
        let (stream, _) = listener.accept().await.unwrap();
        let advertised: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&advertised);
        let ack = acked_tag.clone();
        let mut ws = tokio_tungstenite::accept_hdr_async(
            stream,
            move |request: &Request, mut response: Response| {
                *seen.lock().unwrap() = request
                    .headers()
                    .get("last-message-id")
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string);
                response
                    .headers_mut()
                    .insert("last-received-id", ack.parse().unwrap());
                Ok(response)
            },
        )
        .await
        .unwrap();

        let mut replayed = Vec::new();
        while replayed.len() < 3 {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => replayed.push(text),
                Some(Ok(_)) => {}
                other => panic!("replay stream ended early: {other:?}"),
            }
        }
        let advertised = advertised.lock().unwrap().clone();
        (first, advertised, replayed)
    });

    let transport = WebSocketTransport::new(WebSocketConfig {
        url: format!("ws://{addr}"),
        keepalive_interval: Duration::from_secs(60),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_attempts: 3,
        },
        ..Default::default()
    });
    transport.connect().await.unwrap();
    for frame in &frames {
        transport.send(frame.clone()).await.unwrap();
    }

    let (first, advertised, replayed) = tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server never saw the replay")
        .unwrap();

    assert_eq!(first, payloads);
    // The reconnect advertised the tag of the last frame sent.
    assert_eq!(advertised.as_deref(), Some(last_tag.as_str()));
    // Frames one and two were acknowledged; three through five replay in order.
    assert_eq!(replayed, payloads[2..].to_vec());

    // The transport is usable again after the replay completes.
    for _ in 0..100 {
        if transport.is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(transport.is_connected());
    transport.disconnect().await.unwrap();
}
