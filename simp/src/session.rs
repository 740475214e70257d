//! Per-process session plumbing shared by both roles.
//!
//! A [`Session`] owns the transport, the local display name, the bound peer,
//! and the stop-and-wait [`Sender`] / [`Receiver`] pair.  Its
//! responsibilities are:
//! - Encoding outbound messages and decoding inbound datagrams, dropping
//!   anything malformed.
//! - Filtering datagrams from addresses other than the bound peer (the
//!   server answers them as busy).
//! - Acknowledging every non-ACK message from the peer on receipt.
//! - The reliable send ([`Session::send_reliable`]) and the FIN exchange
//!   ([`Session::teardown`]).
//!
//! Lifecycle state lives one level up, in [`crate::client::Client`] and
//! [`crate::server::Server`].

use std::net::SocketAddr;
use std::time::Instant;

use thiserror::Error;

use crate::codec::{self, EncodeError};
use crate::config::SessionConfig;
use crate::message::{Control, Kind, Message};
use crate::receiver::{Delivery, Receiver};
use crate::sender::{Sender, Timeout};
use crate::socket::{Transport, TransportError};

// ---------------------------------------------------------------------------
// Constants and errors
// ---------------------------------------------------------------------------

/// CONTROL/ERR text sent to anyone who is not the bound peer.
pub const BUSY_TEXT: &str = "Server is busy";

/// CONTROL/ERR text sent when the operator denies a connection.
pub const REJECT_TEXT: &str = "Connection rejected";

/// Errors surfaced by session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("cannot encode message: {0}")]
    Encode(#[from] EncodeError),
    #[error("no handshake response after {attempts} attempts")]
    HandshakeFailed { attempts: u32 },
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("peer error: {0}")]
    Peer(String),
    #[error("message not acknowledged after {attempts} transmissions")]
    DeliveryFailed { attempts: u32 },
    #[error("operation not valid in state {0}")]
    BadState(String),
}

// ---------------------------------------------------------------------------
// Collaborators and results
// ---------------------------------------------------------------------------

/// Which side of the protocol a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    fn tag(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
        }
    }
}

/// What the application sees from an established session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A CHAT from the peer, already acknowledged.
    Chat(Message),
    /// The peer sent FIN and it was acknowledged.
    Closed,
}

/// Result of a reliable send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Acked,
    /// The peer sent FIN or ERR instead of acknowledging; the message is
    /// queued and the next [`Session::next_event`] surfaces it.
    Interrupted,
}

/// The terminal-facing collaborator of a chat session.
///
/// Supplied by the hosting application so the protocol engine performs no
/// terminal I/O of its own.
pub trait Chat {
    /// Next line to send; `None` when input is exhausted.
    fn compose(&mut self) -> Option<String>;

    /// Show a CHAT from the peer.
    fn display(&mut self, message: &Message);

    /// Status text (connection established, peer closed, ...).
    fn notice(&mut self, _text: &str) {}
}

/// One datagram after decoding, or the end of a wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Message(Message, SocketAddr),
    Timeout,
}

/// Traffic from the bound peer, after filtering and acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FromPeer {
    Ack,
    Message(Message),
    Timeout,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub struct Session<T> {
    transport: T,
    role: Role,
    local_name: String,
    config: SessionConfig,
    peer: Option<SocketAddr>,
    sender: Sender,
    receiver: Receiver,
}

impl<T: Transport> Session<T> {
    pub fn new(
        transport: T,
        role: Role,
        local_name: impl Into<String>,
        config: SessionConfig,
    ) -> Self {
        Self {
            sender: Sender::new(config.max_retries),
            receiver: Receiver::new(),
            transport,
            role,
            local_name: local_name.into(),
            config,
            peer: None,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Stop-and-wait send state; idle between reliable sends.
    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    /// Messages held back for the next receive.
    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn bind_peer(&mut self, peer: SocketAddr) {
        self.peer = Some(peer);
    }

    pub fn unbind_peer(&mut self) {
        self.peer = None;
    }

    /// A CONTROL message signed with the local name.
    pub fn control(&self, op: Control) -> Message {
        Message::control(op, self.local_name.clone())
    }

    /// Encode and send one message, unreliably.
    pub async fn send(&self, message: &Message, dest: SocketAddr) -> Result<(), SessionError> {
        let bytes = codec::encode(message)?;
        self.transport.send_to(&bytes, dest).await?;
        log::debug!(
            "[{}] → {} seq={} len={} to {dest}",
            self.role.tag(),
            message.kind,
            message.sequence,
            message.length()
        );
        Ok(())
    }

    pub async fn send_control(&self, op: Control, dest: SocketAddr) -> Result<(), SessionError> {
        self.send(&self.control(op), dest).await
    }

    /// CONTROL/ERR with `reason`, sent once.
    pub async fn send_error(&self, reason: &str, dest: SocketAddr) -> Result<(), SessionError> {
        self.send(&Message::error(self.local_name.clone(), reason), dest)
            .await
    }

    /// Deadline for a wait starting now.
    pub fn deadline(&self) -> Instant {
        Instant::now() + self.config.timeout
    }

    /// Wait for the next well-formed datagram from anyone until `deadline`.
    ///
    /// Malformed datagrams and transient socket errors are logged and
    /// skipped without ending the wait early.
    pub async fn recv_before(&mut self, deadline: Instant) -> Result<Inbound, SessionError> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Inbound::Timeout);
            }
            let (bytes, from) = match self.transport.recv_from(remaining).await {
                Ok(Some(datagram)) => datagram,
                Ok(None) => return Ok(Inbound::Timeout),
                Err(e) if e.is_transient() => {
                    log::debug!("[{}] transient receive error: {e}", self.role.tag());
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            match codec::decode(&bytes) {
                Ok(message) => {
                    log::debug!(
                        "[{}] ← {} seq={} len={} from {from}",
                        self.role.tag(),
                        message.kind,
                        message.sequence,
                        message.length()
                    );
                    return Ok(Inbound::Message(message, from));
                }
                Err(e) => {
                    log::warn!(
                        "[{}] dropping malformed datagram from {from}: {e}",
                        self.role.tag()
                    );
                }
            }
        }
    }

    /// One `timeout`-bounded wait.
    pub async fn recv(&mut self) -> Result<Inbound, SessionError> {
        let deadline = self.deadline();
        self.recv_before(deadline).await
    }

    /// Reply to a datagram from an address that is not the bound peer.
    ///
    /// The server answers busy; the client only logs.  CONTROL/ERR is never
    /// answered so two peers cannot bounce errors at each other.
    pub async fn turn_away(
        &self,
        message: &Message,
        from: SocketAddr,
    ) -> Result<(), SessionError> {
        match self.role {
            Role::Server if !message.is(Control::Err) => {
                log::info!("[server] {from} ({}) told server is busy", message.user);
                self.send_error(BUSY_TEXT, from).await
            }
            _ => {
                log::warn!(
                    "[{}] ignoring {} from unknown source {from}",
                    self.role.tag(),
                    message.kind
                );
                Ok(())
            }
        }
    }

    /// Wait until `deadline` for traffic from the bound peer.
    ///
    /// Every non-ACK message is acknowledged before it is returned;
    /// retransmissions of the previous CHAT are acknowledged and swallowed.
    async fn poll_peer(&mut self, deadline: Instant) -> Result<FromPeer, SessionError> {
        let Some(peer) = self.peer else {
            return Err(SessionError::BadState("no peer bound".into()));
        };
        loop {
            let (message, from) = match self.recv_before(deadline).await? {
                Inbound::Timeout => return Ok(FromPeer::Timeout),
                Inbound::Message(m, from) => (m, from),
            };
            if from != peer {
                self.turn_away(&message, from).await?;
                continue;
            }
            if message.is(Control::Ack) {
                return Ok(FromPeer::Ack);
            }
            self.send_control(Control::Ack, peer).await?;
            if self.receiver.on_message(&message) == Delivery::Duplicate {
                log::debug!(
                    "[{}] duplicate CHAT from {}, re-acknowledged",
                    self.role.tag(),
                    message.user
                );
                continue;
            }
            return Ok(FromPeer::Message(message));
        }
    }

    /// Send `message` to the bound peer and wait for its ACK, retransmitting
    /// with `Sequence::Err` up to `max_retries` times.
    ///
    /// CHAT messages arriving meanwhile are acknowledged and queued.  A FIN
    /// or ERR is queued too and ends the wait with [`Outcome::Interrupted`].
    ///
    /// A message the wire format cannot carry fails with
    /// [`SessionError::Encode`] before anything is sent.  On every error the
    /// sender is left idle, ready for the next message.
    pub async fn send_reliable(&mut self, message: Message) -> Result<Outcome, SessionError> {
        let Some(peer) = self.peer else {
            return Err(SessionError::BadState("no peer bound".into()));
        };
        codec::encode(&message)?;
        let wire = self.sender.begin(message);

        let result = self.await_ack(wire, peer).await;
        if result.is_err() {
            self.sender.abandon();
        }
        result
    }

    async fn await_ack(
        &mut self,
        mut wire: Message,
        peer: SocketAddr,
    ) -> Result<Outcome, SessionError> {
        loop {
            self.send(&wire, peer).await?;
            let deadline = self.deadline();

            let acked = loop {
                match self.poll_peer(deadline).await? {
                    FromPeer::Ack => break true,
                    FromPeer::Timeout => break false,
                    FromPeer::Message(m) => match m.kind {
                        Kind::Control(Control::Fin) | Kind::Control(Control::Err) => {
                            log::info!(
                                "[{}] {} arrived while awaiting ACK",
                                self.role.tag(),
                                m.kind
                            );
                            self.sender.abandon();
                            self.receiver.defer(m);
                            return Ok(Outcome::Interrupted);
                        }
                        Kind::Chat => self.receiver.defer(m),
                        other => {
                            log::debug!("[{}] ignoring {other} while awaiting ACK", self.role.tag())
                        }
                    },
                }
            };

            if acked {
                if let Some(rtt) = self.sender.on_ack() {
                    log::debug!("[{}] ACK after {rtt:?}", self.role.tag());
                }
                return Ok(Outcome::Acked);
            }

            match self.sender.on_timeout() {
                Some(Timeout::Retransmit(copy)) => {
                    log::warn!(
                        "[{}] no ACK within {:?}, retransmitting",
                        self.role.tag(),
                        self.config.timeout
                    );
                    wire = copy;
                }
                Some(Timeout::GiveUp { attempts }) => {
                    return Err(SessionError::DeliveryFailed { attempts });
                }
                None => return Err(SessionError::BadState("nothing in flight".into())),
            }
        }
    }

    /// Next message from the peer: queued messages first, then one
    /// `timeout`-bounded wait on the network.  Stray ACKs are ignored.
    ///
    /// Returns `Ok(None)` when the wait expires.
    pub async fn next_message(&mut self) -> Result<Option<Message>, SessionError> {
        if let Some(m) = self.receiver.next_deferred() {
            return Ok(Some(m));
        }
        let deadline = self.deadline();
        loop {
            match self.poll_peer(deadline).await? {
                FromPeer::Message(m) => return Ok(Some(m)),
                FromPeer::Ack => {
                    log::debug!("[{}] stray ACK ignored", self.role.tag());
                }
                FromPeer::Timeout => return Ok(None),
            }
        }
    }

    /// Dispatch the next message from the peer.
    ///
    /// CHAT becomes [`Event::Chat`], FIN becomes [`Event::Closed`] and ERR
    /// becomes [`SessionError::Peer`].  Handshake leftovers (a repeated
    /// SYN_ACK whose ACK was lost, or a repeated SYN) were acknowledged by
    /// [`Session::poll_peer`] and are otherwise ignored.
    pub async fn next_event(&mut self) -> Result<Option<Event>, SessionError> {
        let Some(message) = self.next_message().await? else {
            return Ok(None);
        };
        match message.kind {
            Kind::Chat => Ok(Some(Event::Chat(message))),
            Kind::Control(Control::Fin) => Ok(Some(Event::Closed)),
            Kind::Control(Control::Err) => Err(SessionError::Peer(message.payload)),
            other => {
                log::debug!("[{}] ignoring {other} in established session", self.role.tag());
                Ok(None)
            }
        }
    }

    /// Send FIN to the bound peer and wait for its ACK, resending FIN up to
    /// `handshake_attempts` times in total.
    pub async fn teardown(&mut self) -> Result<(), SessionError> {
        let Some(peer) = self.peer else {
            return Err(SessionError::BadState("no peer bound".into()));
        };
        let attempts = self.config.handshake_attempts;
        for attempt in 1..=attempts {
            self.send_control(Control::Fin, peer).await?;
            let deadline = self.deadline();
            loop {
                match self.poll_peer(deadline).await? {
                    FromPeer::Ack => {
                        log::info!("[{}] FIN acknowledged by {peer}", self.role.tag());
                        return Ok(());
                    }
                    FromPeer::Timeout => break,
                    FromPeer::Message(m) if m.is(Control::Err) => {
                        return Err(SessionError::Peer(m.payload));
                    }
                    // Already acknowledged; nothing more will be read.
                    FromPeer::Message(m) => {
                        log::debug!("[{}] discarding {} during teardown", self.role.tag(), m.kind)
                    }
                }
            }
            log::warn!(
                "[{}] FIN not acknowledged (attempt {attempt}/{attempts})",
                self.role.tag()
            );
        }
        Err(SessionError::DeliveryFailed { attempts })
    }
}
