//! Integration tests for the `ChatClient` handle against a live server.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parley::prelude::*;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

// =========================================================================
// Helpers
// =========================================================================

struct TestServer {
    addr: String,
    task: tokio::task::JoinHandle<Result<(), ParleyError>>,
}

impl TestServer {
    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Drops the server without a graceful shutdown: sockets just close.
    async fn kill(self) {
        self.task.abort();
        let _ = self.task.await;
    }
}

async fn start_server_at(builder: ParleyServerBuilder, addr: &str) -> TestServer {
    let server = builder.bind(addr).build().await.expect("server should build");
    let addr = server
        .local_addr()
        .expect("should have local addr")
        .to_string();
    let task = tokio::spawn(server.run());

    tokio::time::sleep(Duration::from_millis(10)).await;
    TestServer { addr, task }
}

async fn start_server() -> TestServer {
    start_server_at(ParleyServer::builder(), "127.0.0.1:0").await
}

fn fast_reconnect() -> ReconnectPolicy {
    ReconnectPolicy {
        base_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(200),
        max_retries: 20,
        jitter: 0.0,
    }
}

fn config() -> ClientConfig {
    ClientConfig::default()
        .with_reconnect(fast_reconnect())
        .with_join_timeout(Duration::from_secs(2))
        .with_leave_timeout(Duration::from_secs(1))
}

async fn client(server: &TestServer) -> ChatClient {
    ChatClient::connect(&server.url(), config())
        .await
        .expect("client should connect")
}

/// Routes a client's inbound messages into a channel.
fn inbox(client: &ChatClient) -> mpsc::UnboundedReceiver<ChatMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.on_message(move |msg| {
        let _ = tx.send(msg);
    });
    rx
}

async fn next_message(rx: &mut mpsc::UnboundedReceiver<ChatMessage>) -> ChatMessage {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a message")
        .expect("inbox closed")
}

async fn assert_no_message(rx: &mut mpsc::UnboundedReceiver<ChatMessage>) {
    let result = tokio::time::timeout(Duration::from_millis(150), rx.recv()).await;
    assert!(result.is_err(), "expected no message, got {result:?}");
}

/// Polls `check` until it holds or three seconds pass.
async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..300 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn msg(text: &str, author: &str) -> ChatMessage {
    ChatMessage::new(text, author, 1_700_000_000_000)
}

// =========================================================================
// Join and messaging
// =========================================================================

#[tokio::test]
async fn test_join_sets_state_room_and_session() {
    let server = start_server().await;
    let alice = client(&server).await;
    assert_eq!(alice.state(), HandleState::Disconnected);

    alice.join_room("lobby").await.expect("join");

    assert_eq!(alice.state(), HandleState::Joined);
    assert_eq!(alice.current_room(), Some(RoomId::new("lobby")));
    assert!(alice.session_id().is_some());
}

#[tokio::test]
async fn test_two_clients_chat_in_one_room() {
    let server = start_server().await;
    let alice = client(&server).await;
    let bob = client(&server).await;
    let mut alice_inbox = inbox(&alice);
    let mut bob_inbox = inbox(&bob);
    alice.join_room("lobby").await.unwrap();
    bob.join_room("lobby").await.unwrap();

    alice.send_message(msg("hi bob", "alice")).unwrap();
    alice.send_message(msg("you there?", "alice")).unwrap();

    let first = next_message(&mut bob_inbox).await;
    let second = next_message(&mut bob_inbox).await;
    assert_eq!(first.text, "hi bob");
    assert_eq!(second.text, "you there?");

    bob.send_message(msg("hey", "bob")).unwrap();
    assert_eq!(next_message(&mut bob_inbox).await.author, "bob");

    // Echo is on by default, so alice sees her own messages too.
    assert_eq!(next_message(&mut alice_inbox).await.text, "hi bob");
}

#[tokio::test]
async fn test_messages_stay_in_their_room() {
    let server = start_server().await;
    let alice = client(&server).await;
    let bob = client(&server).await;
    let mut bob_inbox = inbox(&bob);
    alice.join_room("red").await.unwrap();
    bob.join_room("blue").await.unwrap();

    alice.send_message(msg("red only", "alice")).unwrap();

    assert_no_message(&mut bob_inbox).await;
}

#[tokio::test]
async fn test_join_same_room_twice_is_noop() {
    let server = start_server().await;
    let alice = client(&server).await;
    alice.join_room("lobby").await.unwrap();
    let session = alice.session_id();

    alice.join_room("lobby").await.unwrap();

    assert_eq!(alice.state(), HandleState::Joined);
    assert_eq!(alice.session_id(), session);
}

#[tokio::test]
async fn test_join_other_room_switches() {
    let server = start_server().await;
    let alice = client(&server).await;
    let bob = client(&server).await;
    let mut alice_inbox = inbox(&alice);
    alice.join_room("red").await.unwrap();
    bob.join_room("red").await.unwrap();

    alice.join_room("blue").await.unwrap();
    bob.send_message(msg("still in red?", "bob")).unwrap();

    assert_eq!(alice.current_room(), Some(RoomId::new("blue")));
    assert_no_message(&mut alice_inbox).await;
}

#[tokio::test]
async fn test_join_full_room_fails() {
    let config = RegistryConfig::default()
        .with_room(RoomConfig::default().with_max_members(1));
    let server = start_server_at(
        ParleyServer::builder().registry_config(config),
        "127.0.0.1:0",
    )
    .await;
    let alice = client(&server).await;
    let bob = client(&server).await;
    alice.join_room("tiny").await.unwrap();

    let result = bob.join_room("tiny").await;

    assert!(matches!(
        result,
        Err(ClientError::Join(JoinError::RoomFull(ref room))) if room.as_str() == "tiny"
    ));
    assert_eq!(bob.state(), HandleState::Disconnected);
    assert_eq!(bob.current_room(), None);
}

// =========================================================================
// Leave and send policy
// =========================================================================

#[tokio::test]
async fn test_leave_returns_to_disconnected() {
    let server = start_server().await;
    let alice = client(&server).await;
    alice.join_room("lobby").await.unwrap();

    alice.leave_room().await.unwrap();

    assert_eq!(alice.state(), HandleState::Disconnected);
    assert_eq!(alice.current_room(), None);
}

#[tokio::test]
async fn test_leave_twice_is_harmless() {
    let server = start_server().await;
    let alice = client(&server).await;
    alice.join_room("lobby").await.unwrap();

    alice.leave_room().await.unwrap();
    alice.leave_room().await.unwrap();

    assert_eq!(alice.state(), HandleState::Disconnected);
}

#[tokio::test]
async fn test_no_delivery_after_leave() {
    let server = start_server().await;
    let alice = client(&server).await;
    let bob = client(&server).await;
    let mut alice_inbox = inbox(&alice);
    alice.join_room("lobby").await.unwrap();
    bob.join_room("lobby").await.unwrap();

    alice.leave_room().await.unwrap();
    bob.send_message(msg("bye alice", "bob")).unwrap();

    assert_no_message(&mut alice_inbox).await;
}

#[tokio::test]
async fn test_send_while_not_joined_is_dropped_by_default() {
    let server = start_server().await;
    let alice = client(&server).await;

    assert!(alice.send_message(msg("into the void", "alice")).is_ok());
}

#[tokio::test]
async fn test_send_while_not_joined_rejected_by_policy() {
    let server = start_server().await;
    let alice = ChatClient::connect(
        &server.url(),
        config().with_send_policy(SendPolicy::Reject),
    )
    .await
    .unwrap();

    let result = alice.send_message(msg("hello?", "alice"));

    assert!(matches!(result, Err(ClientError::NotJoined)));
}

#[tokio::test]
async fn test_send_empty_text_is_rejected() {
    let server = start_server().await;
    let alice = client(&server).await;
    alice.join_room("lobby").await.unwrap();

    let result = alice.send_message(msg("", "alice"));

    assert!(matches!(result, Err(ClientError::Protocol(_))));
}

#[tokio::test]
async fn test_send_empty_text_while_not_joined_is_dropped() {
    let server = start_server().await;
    let alice = client(&server).await;

    assert!(alice.send_message(msg("", "alice")).is_ok());
}

// =========================================================================
// Connection lifecycle
// =========================================================================

#[tokio::test]
async fn test_connect_to_dead_server_fails() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let policy = ReconnectPolicy {
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(10),
        max_retries: 2,
        jitter: 0.0,
    };
    let result = ChatClient::connect(
        &format!("ws://{addr}"),
        ClientConfig::default().with_reconnect(policy),
    )
    .await;

    match result {
        Err(ClientError::Connection(ConnectionError::RetriesExhausted {
            attempts,
            ..
        })) => assert_eq!(attempts, 3),
        Err(other) => panic!("expected RetriesExhausted, got {other:?}"),
        Ok(_) => panic!("expected connect to fail"),
    }
}

#[tokio::test]
async fn test_join_times_out_without_ack() {
    // A server that accepts the socket but never answers.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                if let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await {
                    while let Some(Ok(_)) = ws.next().await {}
                }
            });
        }
    });

    let alice = ChatClient::connect(
        &format!("ws://{addr}"),
        config().with_join_timeout(Duration::from_millis(200)),
    )
    .await
    .unwrap();

    let result = alice.join_room("lobby").await;

    assert!(matches!(
        result,
        Err(ClientError::Join(JoinError::Timeout(_)))
    ));
    assert_eq!(alice.state(), HandleState::Disconnected);
}

#[tokio::test]
async fn test_leave_times_out_without_ack() {
    // A server that acks joins but never answers a leave.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(frame)) = ws.next().await {
                    let Ok(envelope) =
                        serde_json::from_slice::<Envelope>(&frame.into_data())
                    else {
                        continue;
                    };
                    if let (FrameKind::Join, Some(room_id)) = (envelope.kind, envelope.room_id) {
                        let ack = Envelope::join_ack(room_id, SessionId(1));
                        let bytes = serde_json::to_vec(&ack).unwrap();
                        let _ = ws.send(Message::binary(bytes)).await;
                    }
                }
            });
        }
    });

    let alice = ChatClient::connect(
        &format!("ws://{addr}"),
        config().with_leave_timeout(Duration::from_millis(200)),
    )
    .await
    .unwrap();
    alice.join_room("lobby").await.unwrap();

    let started = tokio::time::Instant::now();
    alice.leave_room().await.unwrap();

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(alice.state(), HandleState::Disconnected);
    assert_eq!(alice.current_room(), None);
}

#[tokio::test]
async fn test_retries_exhausted_after_server_dies() {
    let server = start_server().await;
    let policy = ReconnectPolicy {
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
        max_retries: 2,
        jitter: 0.0,
    };
    let alice = ChatClient::connect(&server.url(), config().with_reconnect(policy))
        .await
        .unwrap();
    alice.join_room("lobby").await.unwrap();

    server.kill().await;

    eventually(|| alice.connection_error().is_some()).await;
    assert!(matches!(
        alice.connection_error(),
        Some(ConnectionError::RetriesExhausted { .. })
    ));
    assert_eq!(alice.state(), HandleState::Disconnected);
    assert!(matches!(
        alice.join_room("lobby").await,
        Err(ClientError::Connection(ConnectionError::RetriesExhausted { .. }))
    ));
}

#[tokio::test]
async fn test_close_ends_the_link() {
    let server = start_server().await;
    let alice = client(&server).await;
    alice.join_room("lobby").await.unwrap();

    alice.close().await;

    eventually(|| alice.connection_error().is_some()).await;
    assert_eq!(alice.connection_error(), Some(ConnectionError::Closed));
    assert!(matches!(
        alice.join_room("lobby").await,
        Err(ClientError::Connection(ConnectionError::Closed))
    ));
}

#[tokio::test]
async fn test_server_shutdown_evicts_client() {
    let server = ParleyServer::builder()
        .bind("127.0.0.1:0")
        .build()
        .await
        .unwrap();
    let url = format!("ws://{}", server.local_addr().unwrap());
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let task = tokio::spawn(server.run_until(async {
        let _ = stop_rx.await;
    }));

    let alice = ChatClient::connect(&url, config()).await.unwrap();
    alice.join_room("lobby").await.unwrap();

    let _ = stop_tx.send(());
    task.await.unwrap().unwrap();

    eventually(|| alice.state() == HandleState::Disconnected).await;
    assert_eq!(alice.current_room(), None);
}

#[tokio::test]
async fn test_reconnect_rejoins_last_room() {
    let server = start_server().await;
    let addr = server.addr.clone();
    let alice = client(&server).await;
    let mut alice_inbox = inbox(&alice);
    alice.join_room("lobby").await.unwrap();

    server.kill().await;
    eventually(|| alice.state() != HandleState::Joined).await;

    let server = start_server_at(ParleyServer::builder(), &addr).await;
    eventually(|| alice.state() == HandleState::Joined).await;
    assert_eq!(alice.current_room(), Some(RoomId::new("lobby")));
    assert!(alice.session_id().is_some());

    // Messages flow again on the new session.
    let bob = client(&server).await;
    bob.join_room("lobby").await.unwrap();
    bob.send_message(msg("welcome back", "bob")).unwrap();
    assert_eq!(next_message(&mut alice_inbox).await.text, "welcome back");
}

#[tokio::test]
async fn test_leave_during_outage_cancels_rejoin() {
    let server = start_server().await;
    let addr = server.addr.clone();
    let alice = client(&server).await;
    alice.join_room("lobby").await.unwrap();

    server.kill().await;
    eventually(|| alice.state() == HandleState::Disconnected).await;
    alice.leave_room().await.unwrap();

    let _server = start_server_at(ParleyServer::builder(), &addr).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(alice.state(), HandleState::Disconnected);
    assert_eq!(alice.current_room(), None);
}
