//! Integration tests for the 3-way handshake and admission control.
//!
//! Each test binds real `Socket`s on loopback, runs the server half in a
//! background task, and checks where both state machines end up.

use std::net::SocketAddr;
use std::time::Duration;

use simp::codec::{self, EncodeError};
use simp::message::{Control, Message};
use simp::simulator::Simulator;
use simp::state::{ClientState, ServerState};
use simp::{Client, Server, SessionConfig, SessionError, Socket, Transport};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn quick() -> SessionConfig {
    SessionConfig::default().with_timeout(Duration::from_millis(200))
}

/// Bind a socket on an OS-chosen loopback port.
async fn ephemeral() -> Socket {
    Socket::bind("127.0.0.1:0").await.expect("bind socket")
}

fn accept_all(_: SocketAddr, _: &str) -> bool {
    true
}

/// Wait for one SIMP message on a raw socket.
async fn recv_message(socket: &Socket) -> (Message, SocketAddr) {
    let (bytes, from) = socket
        .recv_from(Duration::from_secs(2))
        .await
        .expect("recv")
        .expect("no datagram within 2s");
    (codec::decode(&bytes).expect("valid message"), from)
}

async fn send_message(socket: &Socket, message: &Message, dest: SocketAddr) {
    let bytes = codec::encode(message).unwrap();
    socket.send_to(&bytes, dest).await.unwrap();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Both sides reach `Established` and the server binds the client's address.
#[tokio::test]
async fn handshake_both_sides_reach_established() {
    let server_socket = ephemeral().await;
    let server_addr = server_socket.local_addr;

    let server_task = tokio::spawn(async move {
        let mut server = Server::new(server_socket, "alice", accept_all, quick());
        let peer = server.accept().await.expect("accept");
        (server.state(), server.peer(), peer)
    });

    let client_socket = ephemeral().await;
    let client_addr = client_socket.local_addr;
    let mut client = Client::new(client_socket, server_addr, "bob", quick());
    tokio::time::timeout(Duration::from_secs(5), client.connect())
        .await
        .expect("client connect timed out")
        .expect("client connect failed");

    let (state, bound, peer) = tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .expect("server accept timed out")
        .expect("server task panicked");

    assert_eq!(client.state(), ClientState::Established);
    assert_eq!(state, ServerState::Established { peer: client_addr });
    assert_eq!(bound, Some(client_addr));
    assert_eq!(peer, client_addr);
}

/// Connecting to an address where nobody is listening fails after the
/// configured number of SYNs rather than hanging forever.
#[tokio::test]
async fn connect_to_silent_peer_fails_after_bounded_attempts() {
    // Bound but never read from: every SYN goes unanswered.
    let silent = ephemeral().await;

    let config = quick()
        .with_timeout(Duration::from_millis(100))
        .with_handshake_attempts(2);
    let mut client = Client::new(ephemeral().await, silent.local_addr, "bob", config);

    let result = client.connect().await;

    assert!(
        matches!(result, Err(SessionError::HandshakeFailed { attempts: 2 })),
        "expected HandshakeFailed, got: {result:?}"
    );
    assert_eq!(client.state(), ClientState::Closed);
}

/// A denied client is told so; the server keeps listening and admits the
/// next candidate.
#[tokio::test]
async fn rejected_client_sees_error_and_server_keeps_listening() {
    let server_socket = ephemeral().await;
    let server_addr = server_socket.local_addr;

    let mut decisions = 0;
    let gate = move |_: SocketAddr, _: &str| {
        decisions += 1;
        decisions > 1
    };
    let server_task = tokio::spawn(async move {
        let mut server = Server::new(server_socket, "alice", gate, quick());
        server.accept().await.expect("accept")
    });

    let mut first = Client::new(ephemeral().await, server_addr, "eve", quick());
    match first.connect().await {
        Err(SessionError::Refused(reason)) => assert_eq!(reason, "Connection rejected"),
        other => panic!("expected refusal, got {other:?}"),
    }
    assert_eq!(first.state(), ClientState::Closed);

    let second_socket = ephemeral().await;
    let second_addr = second_socket.local_addr;
    let mut second = Client::new(second_socket, server_addr, "bob", quick());
    second.connect().await.expect("second client connects");

    let bound = tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .expect("server accept timed out")
        .expect("server task panicked");
    assert_eq!(bound, second_addr);
}

/// The server does not bind a candidate whose final ACK never arrives; it
/// retransmits SYN_ACK, gives up, and goes back to listening.
#[tokio::test]
async fn server_does_not_bind_until_final_ack() {
    let server_socket = ephemeral().await;
    let server_addr = server_socket.local_addr;

    let config = quick()
        .with_timeout(Duration::from_millis(150))
        .with_handshake_attempts(2);
    let server_task = tokio::spawn(async move {
        let mut server = Server::new(server_socket, "alice", accept_all, config);
        let peer = server.accept().await.expect("accept");
        (peer, server.peer())
    });

    // A hand-driven client that never sends the final ACK.
    let half_open = ephemeral().await;
    send_message(&half_open, &Message::control(Control::Syn, "mallory"), server_addr).await;
    for _ in 0..2 {
        let (reply, _) = recv_message(&half_open).await;
        assert!(reply.is(Control::SynAck), "expected SYN_ACK, got {}", reply.kind);
    }
    // No third SYN_ACK: the server has abandoned the candidate.
    let extra = half_open.recv_from(Duration::from_millis(400)).await.unwrap();
    assert!(extra.is_none());

    let client_socket = ephemeral().await;
    let client_addr = client_socket.local_addr;
    let mut client = Client::new(client_socket, server_addr, "bob", quick());
    client.connect().await.expect("connect after half-open attempt");

    let (peer, bound) = tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .expect("server accept timed out")
        .expect("server task panicked");
    assert_eq!(peer, client_addr);
    assert_eq!(bound, Some(client_addr));
}

/// A repeated SYN from the candidate gets another SYN_ACK, and the
/// handshake still completes.
#[tokio::test]
async fn duplicate_syn_is_answered_again() {
    let server_socket = ephemeral().await;
    let server_addr = server_socket.local_addr;

    let server_task = tokio::spawn(async move {
        let mut server = Server::new(server_socket, "alice", accept_all, quick());
        server.accept().await.expect("accept")
    });

    let raw = ephemeral().await;
    let syn = Message::control(Control::Syn, "bob");
    send_message(&raw, &syn, server_addr).await;
    let (first, _) = recv_message(&raw).await;
    assert!(first.is(Control::SynAck));

    send_message(&raw, &syn, server_addr).await;
    let (second, _) = recv_message(&raw).await;
    assert!(second.is(Control::SynAck));

    send_message(&raw, &Message::control(Control::Ack, "bob"), server_addr).await;
    let bound = tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .expect("server accept timed out")
        .expect("server task panicked");
    assert_eq!(bound, raw.local_addr);
}

/// Datagrams other than SYN are ignored while listening.
#[tokio::test]
async fn non_syn_traffic_is_ignored_while_listening() {
    let server_socket = ephemeral().await;
    let server_addr = server_socket.local_addr;

    let server_task = tokio::spawn(async move {
        let mut server = Server::new(server_socket, "alice", accept_all, quick());
        server.accept().await.expect("accept")
    });

    let raw = ephemeral().await;
    let client_addr = raw.local_addr;
    send_message(&raw, &Message::chat("bob", "anyone?"), server_addr).await;
    raw.send_to(b"garbage", server_addr).await.unwrap();
    assert!(raw
        .recv_from(Duration::from_millis(300))
        .await
        .unwrap()
        .is_none());

    let mut client = Client::new(raw, server_addr, "bob", quick());
    client.connect().await.expect("connect");
    let bound = tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .expect("server accept timed out")
        .expect("server task panicked");
    assert_eq!(bound, client_addr);
    assert_eq!(client.session().peer(), Some(server_addr));
}

/// A display name the `user` field cannot carry fails up front on both
/// sides: the operator is never asked and no SYN goes out.
#[tokio::test]
async fn unencodable_local_name_fails_before_any_traffic() {
    let mut asked = 0;
    let mut server = Server::new(
        ephemeral().await,
        "Jos\u{e9}",
        |_: SocketAddr, _: &str| {
            asked += 1;
            true
        },
        quick(),
    );
    let result = tokio::time::timeout(Duration::from_secs(1), server.accept())
        .await
        .expect("accept returns without listening");
    assert!(
        matches!(
            result,
            Err(SessionError::Encode(EncodeError::NonAscii { field: "user" }))
        ),
        "expected NonAscii user, got {result:?}"
    );
    assert_eq!(server.state(), ServerState::Listening);
    drop(server);
    assert_eq!(asked, 0);

    let listener = ephemeral().await;
    let long_name = "n".repeat(codec::USER_LEN + 1);
    let mut client = Client::new(
        Simulator::passthrough(ephemeral().await),
        listener.local_addr,
        long_name,
        quick(),
    );
    assert!(matches!(
        client.connect().await,
        Err(SessionError::Encode(EncodeError::UserTooLong(33)))
    ));
    assert_eq!(client.state(), ClientState::Closed);
    assert!(client.session().transport().sent().is_empty());
}
