//! Robustness tests for the push-channel server.
//!
//! These tests verify the daemon handles edge cases and error conditions gracefully:
//! - Malformed requests
//! - Message size limits, with or without a line terminator
//! - Rapid connect/disconnect
//! - Broadcast under churn
//! - Recovery after errors
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::path::PathBuf;
use std::time::Duration;

use overlord_protocol::{ClientMessage, DaemonMessage, Event};
use overlordd::{Overlord, OverlordConfig, PushServer};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

const SOCKET_WAIT_TIMEOUT: Duration = Duration::from_millis(500);
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);
const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Small limit so the size tests stay cheap
const TEST_MAX_MESSAGE_SIZE: usize = 4096;

// ============================================================================
// Test Helpers
// ============================================================================

struct TestServer {
    socket_path: PathBuf,
    overlord: Overlord,
    _temp_dir: TempDir,
}

impl TestServer {
    async fn spawn() -> Self {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let socket_path = temp_dir.path().join("robust.sock");

        let mut config = OverlordConfig::default();
        config.socket_path = socket_path.clone();
        config.heartbeat.enabled = false;
        config.delivery.max_message_size = TEST_MAX_MESSAGE_SIZE;

        let overlord = Overlord::start(config, CancellationToken::new()).expect("valid config");
        let server = PushServer::from_config(overlord.clone());
        tokio::spawn(async move {
            let _ = server.run().await;
        });

        let start = tokio::time::Instant::now();
        while !socket_path.exists() && start.elapsed() < SOCKET_WAIT_TIMEOUT {
            sleep(SOCKET_POLL_INTERVAL).await;
        }
        assert!(socket_path.exists(), "Server socket did not appear");

        Self {
            socket_path,
            overlord,
            _temp_dir: temp_dir,
        }
    }

    async fn connect(&self) -> TestClient {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .expect("connect to server");
        TestClient::new(stream)
    }

    async fn connected(&self, subscribe: bool) -> TestClient {
        let mut client = self.connect().await;
        let msg = if subscribe {
            ClientMessage::connect(None)
        } else {
            ClientMessage::connect_publisher(None)
        };
        client.send(msg).await;
        assert!(matches!(client.recv().await, DaemonMessage::Connected { .. }));
        client
    }

    async fn wait_for_subscribers(&self, expected: usize) {
        let registry = self.overlord.registry();
        let start = tokio::time::Instant::now();
        while registry.len().await != expected && start.elapsed() < RECV_TIMEOUT {
            sleep(SOCKET_POLL_INTERVAL).await;
        }
        assert_eq!(registry.len().await, expected);
    }

    async fn shutdown(self) {
        self.overlord.shutdown().await;
        sleep(Duration::from_millis(50)).await;
    }
}

struct TestClient {
    reader: BufReader<tokio::net::unix::OwnedReadHalf>,
    writer: tokio::net::unix::OwnedWriteHalf,
}

impl TestClient {
    fn new(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
        }
    }

    async fn send(&mut self, msg: ClientMessage) {
        let json = serde_json::to_string(&msg).unwrap();
        self.send_raw(&json).await;
    }

    async fn send_raw(&mut self, line: &str) {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn recv_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let read = timeout(RECV_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("read timed out")
            .unwrap_or(0);
        (read > 0).then_some(line)
    }

    async fn recv_value(&mut self) -> Value {
        serde_json::from_str(&self.recv_line().await.expect("connection closed")).unwrap()
    }

    async fn recv(&mut self) -> DaemonMessage {
        serde_json::from_value(self.recv_value().await).unwrap()
    }

    /// Expects an error reply and returns its `message` field.
    async fn recv_error(&mut self) -> String {
        match self.recv().await {
            DaemonMessage::Error { message, .. } => message,
            other => panic!("Expected Error, got {other:?}"),
        }
    }

    /// Ping round trip proving the channel is still served.
    async fn assert_alive(&mut self, seq: u64) {
        self.send(ClientMessage::ping(seq)).await;
        match self.recv().await {
            DaemonMessage::Pong { seq: got } => assert_eq!(got, seq),
            other => panic!("Expected Pong, got {other:?}"),
        }
    }
}

// ============================================================================
// Malformed Request Tests
// ============================================================================

#[tokio::test]
async fn test_malformed_json_answers_json_error() {
    let server = TestServer::spawn().await;
    let mut client = server.connected(false).await;

    client.send_raw("{this is not json").await;
    assert_eq!(client.recv_error().await, "Invalid JSON Object");

    client.assert_alive(1).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_empty_line_answers_json_error() {
    let server = TestServer::spawn().await;
    let mut client = server.connected(false).await;

    client.send_raw("").await;
    assert_eq!(client.recv_error().await, "Invalid JSON Object");

    client.assert_alive(2).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_unknown_request_answers_value_error() {
    let server = TestServer::spawn().await;
    let mut client = server.connected(false).await;

    client
        .send_raw(r#"{"protocol_version":{"major":1,"minor":0},"type":"teleport"}"#)
        .await;
    assert_eq!(client.recv_error().await, "Value Error");

    client.assert_alive(3).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_invalid_publish_payload_answers_value_error() {
    let server = TestServer::spawn().await;
    let mut subscriber = server.connected(true).await;
    let mut publisher = server.connected(false).await;

    publisher
        .send_raw(
            r#"{"protocol_version":{"major":1,"minor":0},"type":"publish","message":{"unknown_kind":1}}"#,
        )
        .await;
    assert_eq!(publisher.recv_error().await, "Value Error");

    // Nothing reached the subscriber
    subscriber.assert_alive(4).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_multiple_errors_dont_break_connection() {
    let server = TestServer::spawn().await;
    let mut client = server.connected(true).await;

    for bad in ["nope", "[1,2", r#"{"type":"ping"}"#, "42"] {
        client.send_raw(bad).await;
        let message = client.recv_error().await;
        assert!(message == "Invalid JSON Object" || message == "Value Error");
    }

    client.assert_alive(5).await;
    assert_eq!(server.overlord.registry().len().await, 1);
    server.shutdown().await;
}

// ============================================================================
// Message Size Tests
// ============================================================================

#[tokio::test]
async fn test_oversized_message_closes_channel() {
    let server = TestServer::spawn().await;
    let mut client = server.connected(true).await;

    let payload = "x".repeat(TEST_MAX_MESSAGE_SIZE * 2);
    let line = format!(
        r#"{{"protocol_version":{{"major":1,"minor":0}},"type":"publish","message":{{"message":"{payload}"}}}}"#
    );
    client.send_raw(&line).await;

    let message = client.recv_error().await;
    assert_eq!(message, "Value Error");
    assert!(client.recv_line().await.is_none());

    server.wait_for_subscribers(0).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_unterminated_stream_is_cut_off_at_limit() {
    let server = TestServer::spawn().await;
    let mut client = server.connected(true).await;

    // Never sends a newline
    let payload = "y".repeat(TEST_MAX_MESSAGE_SIZE * 3);
    client.writer.write_all(payload.as_bytes()).await.unwrap();
    client.writer.flush().await.unwrap();

    assert_eq!(client.recv_error().await, "Value Error");
    assert!(client.recv_line().await.is_none());

    server.wait_for_subscribers(0).await;
    server.shutdown().await;
}

// ============================================================================
// Connection Churn Tests
// ============================================================================

#[tokio::test]
async fn test_rapid_connect_disconnect() {
    let server = TestServer::spawn().await;

    for _ in 0..20 {
        let client = server.connected(true).await;
        drop(client);
    }

    server.wait_for_subscribers(0).await;

    let mut survivor = server.connected(false).await;
    survivor.assert_alive(6).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_many_concurrent_subscribers_receive_broadcast() {
    let server = TestServer::spawn().await;

    let mut clients = Vec::new();
    for _ in 0..25 {
        clients.push(server.connected(true).await);
    }
    server.wait_for_subscribers(25).await;

    let report = server
        .overlord
        .publish(Event::Message(json!({"n": 1})))
        .await
        .unwrap();
    assert_eq!(report.recipients, 25);
    assert_eq!(report.delivered, 25);
    assert!(report.pruned.is_empty());

    for client in &mut clients {
        assert_eq!(
            client.recv_value().await,
            json!({"message": {"message": {"n": 1}}})
        );
    }

    server.shutdown().await;
}

#[tokio::test]
async fn test_broadcast_during_churn_reaches_survivors() {
    let server = TestServer::spawn().await;

    let mut keep = Vec::new();
    for i in 0..10 {
        let client = server.connected(true).await;
        if i % 2 == 0 {
            keep.push(client);
        }
        // Odd clients are dropped immediately
    }

    let overlord = server.overlord.clone();
    let publisher = tokio::spawn(async move {
        for n in 0..5 {
            overlord
                .publish(Event::Message(json!({ "n": n })))
                .await
                .unwrap();
        }
    });
    publisher.await.unwrap();

    for client in &mut keep {
        for n in 0..5 {
            assert_eq!(
                client.recv_value().await,
                json!({"message": {"message": {"n": n}}})
            );
        }
    }

    server.wait_for_subscribers(5).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_rapid_publishes_preserve_order() {
    let server = TestServer::spawn().await;
    let mut subscriber = server.connected(true).await;
    let mut publisher = server.connected(false).await;

    for n in 0..50u64 {
        publisher
            .send(ClientMessage::publish(Event::Message(json!(n))))
            .await;
    }

    for n in 0..50u64 {
        assert_eq!(
            subscriber.recv_value().await,
            json!({"message": {"message": n}})
        );
        assert!(matches!(
            publisher.recv().await,
            DaemonMessage::Published { delivered: 1, .. }
        ));
    }

    server.shutdown().await;
}
