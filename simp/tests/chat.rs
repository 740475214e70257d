//! End-to-end chat sessions between a `Client` and a `Server` on loopback,
//! driven by scripted `Chat` collaborators.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use simp::codec;
use simp::message::{Control, Message};
use simp::simulator::Simulator;
use simp::state::{ClientState, ServerState};
use simp::{Chat, Client, Event, Server, SessionConfig, SessionError, Socket, Transport};

/// Plays back fixed input lines and records everything shown.
#[derive(Debug, Default)]
struct Script {
    lines: VecDeque<String>,
    shown: Vec<String>,
    notices: Vec<String>,
}

impl Script {
    fn new(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|l| l.to_string()).collect(),
            ..Self::default()
        }
    }
}

impl Chat for Script {
    fn compose(&mut self) -> Option<String> {
        self.lines.pop_front()
    }

    fn display(&mut self, message: &Message) {
        self.shown.push(message.to_string());
    }

    fn notice(&mut self, text: &str) {
        self.notices.push(text.to_string());
    }
}

fn quick() -> SessionConfig {
    SessionConfig::default().with_timeout(Duration::from_millis(300))
}

async fn ephemeral() -> Socket {
    Socket::bind("127.0.0.1:0").await.expect("bind socket")
}

fn accept_all(_: SocketAddr, _: &str) -> bool {
    true
}

async fn recv_message(socket: &Socket) -> (Message, SocketAddr) {
    let (bytes, from) = socket
        .recv_from(Duration::from_secs(2))
        .await
        .expect("recv")
        .expect("no datagram within 2s");
    (codec::decode(&bytes).expect("valid message"), from)
}

/// bob connects to alice, says "hi", gets "hello", and leaves with "bye".
#[tokio::test]
async fn example_conversation() {
    let server_socket = ephemeral().await;
    let server_addr = server_socket.local_addr;

    let server_task = tokio::spawn(async move {
        let mut server = Server::new(server_socket, "alice", accept_all, quick());
        let mut script = Script::new(&["hello"]);
        let result = server.run(&mut script).await;
        (result, script, server.state())
    });

    let mut client = Client::new(
        Simulator::passthrough(ephemeral().await),
        server_addr,
        "bob",
        quick(),
    );
    let mut script = Script::new(&["hi", "bye"]);
    tokio::time::timeout(Duration::from_secs(10), client.run(&mut script))
        .await
        .expect("client timed out")
        .expect("client run");

    let (result, server_script, server_state) =
        tokio::time::timeout(Duration::from_secs(10), server_task)
            .await
            .expect("server timed out")
            .expect("server task panicked");
    result.expect("server run");

    assert_eq!(server_script.shown, vec!["[bob]: hi"]);
    assert_eq!(script.shown, vec!["[alice]: hello"]);
    assert_eq!(
        server_script.notices.last().map(String::as_str),
        Some("Client closed the connection")
    );
    assert_eq!(server_state, ServerState::Closed);
    assert_eq!(client.state(), ClientState::Closed);

    // "bye" is never sent as CHAT; the exchange is hi, then FIN.
    let chats: Vec<_> = client
        .session()
        .transport()
        .sent_messages()
        .into_iter()
        .filter(|m| m.is_chat())
        .collect();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].payload, "hi");
    assert_eq!(chats[0].length(), 2);
}

/// A FIN is sent exactly once; closing again after termination is a no-op.
#[tokio::test]
async fn teardown_sends_a_single_fin() {
    let server_socket = ephemeral().await;
    let server_addr = server_socket.local_addr;

    let server_task = tokio::spawn(async move {
        let mut server = Server::new(server_socket, "alice", accept_all, quick());
        server.accept().await.expect("accept");
        server.next_event().await.expect("next_event")
    });

    let mut client = Client::new(
        Simulator::passthrough(ephemeral().await),
        server_addr,
        "bob",
        quick(),
    );
    client.connect().await.expect("connect");
    client.close().await.expect("close");
    assert_eq!(client.state(), ClientState::Closed);
    client.close().await.expect("second close is a no-op");

    assert_eq!(server_task.await.unwrap(), Event::Closed);

    let fins = client
        .session()
        .transport()
        .sent_messages()
        .into_iter()
        .filter(|m| m.is(Control::Fin))
        .count();
    assert_eq!(fins, 1);
    assert!(matches!(
        client.send_chat("too late").await,
        Err(SessionError::BadState(_))
    ));
}

/// The server operator may end the chat instead of replying.
#[tokio::test]
async fn server_initiated_close() {
    let server_socket = ephemeral().await;
    let server_addr = server_socket.local_addr;

    let server_task = tokio::spawn(async move {
        let mut server = Server::new(server_socket, "alice", accept_all, quick());
        let mut script = Script::new(&["quit"]);
        let result = server.run(&mut script).await;
        (result, script)
    });

    let mut client = Client::new(ephemeral().await, server_addr, "bob", quick());
    let mut script = Script::new(&["hi", "never sent"]);
    client.run(&mut script).await.expect("client run");

    let (result, server_script) = server_task.await.unwrap();
    result.expect("server run");
    assert_eq!(server_script.shown, vec!["[bob]: hi"]);
    assert_eq!(server_script.notices.last().map(String::as_str), Some("Connection ended"));
    assert!(script.shown.is_empty());
    assert_eq!(
        script.notices.last().map(String::as_str),
        Some("Server closed the connection")
    );
    assert_eq!(script.lines.len(), 1);
}

/// A busy server turns away a second client without disturbing the first.
#[tokio::test]
async fn busy_server_keeps_existing_session() {
    let server_socket = ephemeral().await;
    let server_addr = server_socket.local_addr;

    let server_task = tokio::spawn(async move {
        let mut server = Server::new(server_socket, "alice", accept_all, quick());
        server.accept().await.expect("accept");
        let event = server.next_event().await.expect("next_event");
        (event, server.state(), server.peer())
    });

    let first_socket = ephemeral().await;
    let first_addr = first_socket.local_addr;
    let mut first = Client::new(first_socket, server_addr, "bob", quick());
    first.connect().await.expect("first connects");

    let mut intruder = Client::new(ephemeral().await, server_addr, "eve", quick());
    match intruder.connect().await {
        Err(SessionError::Refused(reason)) => assert_eq!(reason, "Server is busy"),
        other => panic!("expected busy refusal, got {other:?}"),
    }

    first.send_chat("still here").await.expect("send");

    let (event, state, peer) = server_task.await.unwrap();
    match event {
        Event::Chat(m) => assert_eq!(m.to_string(), "[bob]: still here"),
        other => panic!("expected chat, got {other:?}"),
    }
    assert_eq!(state, ServerState::Established { peer: first_addr });
    assert_eq!(peer, Some(first_addr));
}

/// CONTROL/ERR from the peer in an established session is fatal.
#[tokio::test]
async fn peer_error_ends_client_session() {
    let raw = ephemeral().await;
    let raw_addr = raw.local_addr;

    let peer_task = tokio::spawn(async move {
        let (syn, client) = recv_message(&raw).await;
        assert!(syn.is(Control::Syn));
        let syn_ack = codec::encode(&Message::control(Control::SynAck, "alice")).unwrap();
        raw.send_to(&syn_ack, client).await.unwrap();
        let (ack, _) = recv_message(&raw).await;
        assert!(ack.is(Control::Ack));

        let err = codec::encode(&Message::error("alice", "shutting down")).unwrap();
        raw.send_to(&err, client).await.unwrap();
        let (ack, _) = recv_message(&raw).await;
        ack
    });

    let mut client = Client::new(ephemeral().await, raw_addr, "bob", quick());
    client.connect().await.expect("connect");
    match client.next_event().await {
        Err(SessionError::Peer(reason)) => assert_eq!(reason, "shutting down"),
        other => panic!("expected peer error, got {other:?}"),
    }
    assert_eq!(client.state(), ClientState::Closed);
    assert!(peer_task.await.unwrap().is(Control::Ack));
}

/// A line the wire format cannot carry is reported locally and the chat
/// carries on; lines are trimmed the same way on both sides.
#[tokio::test]
async fn unsendable_line_is_reported_and_session_survives() {
    let server_socket = ephemeral().await;
    let server_addr = server_socket.local_addr;

    let server_task = tokio::spawn(async move {
        let mut server = Server::new(server_socket, "alice", accept_all, quick());
        let mut script = Script::new(&["na\u{ef}ve", "  naive "]);
        let result = server.run(&mut script).await;
        (result, script, server.state())
    });

    let mut client = Client::new(
        Simulator::passthrough(ephemeral().await),
        server_addr,
        "bob",
        quick(),
    );
    let mut script = Script::new(&["caf\u{e9}", "  cafe  ", "bye"]);
    tokio::time::timeout(Duration::from_secs(10), client.run(&mut script))
        .await
        .expect("client timed out")
        .expect("client run");

    let (result, server_script, server_state) =
        tokio::time::timeout(Duration::from_secs(10), server_task)
            .await
            .expect("server timed out")
            .expect("server task panicked");
    result.expect("server run");

    assert_eq!(server_script.shown, vec!["[bob]: cafe"]);
    assert_eq!(script.shown, vec!["[alice]: naive"]);
    assert!(script
        .notices
        .contains(&"Message not sent: payload is not ASCII".to_string()));
    assert!(server_script
        .notices
        .contains(&"Message not sent: payload is not ASCII".to_string()));
    assert_eq!(
        server_script.notices.last().map(String::as_str),
        Some("Client closed the connection")
    );
    assert_eq!(server_state, ServerState::Closed);
    assert_eq!(client.state(), ClientState::Closed);

    let sent = client.session().transport().sent_messages();
    assert_eq!(sent.iter().filter(|m| m.is_chat()).count(), 1);
    assert_eq!(sent.iter().filter(|m| m.is(Control::Fin)).count(), 1);
}

/// A failed encode leaves the client established; a later close still
/// reaches the server.
#[tokio::test]
async fn encode_failure_keeps_client_established() {
    let server_socket = ephemeral().await;
    let server_addr = server_socket.local_addr;

    let server_task = tokio::spawn(async move {
        let mut server = Server::new(server_socket, "alice", accept_all, quick());
        server.accept().await.expect("accept");
        let event = server.next_event().await.expect("next_event");
        (event, server.state())
    });

    let mut client = Client::new(ephemeral().await, server_addr, "bob", quick());
    client.connect().await.expect("connect");
    assert!(matches!(
        client.send_chat("caf\u{e9}").await,
        Err(SessionError::Encode(_))
    ));
    assert_eq!(client.state(), ClientState::Established);
    assert_eq!(client.session().peer(), Some(server_addr));

    client.close().await.expect("close reaches the server");
    let (event, state) = tokio::time::timeout(Duration::from_secs(5), server_task)
        .await
        .expect("server timed out")
        .expect("server task panicked");
    assert_eq!(event, Event::Closed);
    assert_eq!(state, ServerState::Closed);
}
