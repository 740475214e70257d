//! Server side of a SIMP session, including admission control.
//!
//! The server binds at most one peer per process run.  A SYN from a new
//! address while nobody is bound goes to the injected [`Gate`]; everyone else
//! is answered with CONTROL/ERR "Server is busy" and otherwise ignored.
//!
//! The peer is committed only once the client's final ACK arrives.  Until
//! then the candidate sits in [`ServerState::Negotiating`] and SYN_ACK is
//! retransmitted; if the ACK never comes the server returns to listening.

use std::net::SocketAddr;

use crate::codec;
use crate::config::SessionConfig;
use crate::message::{Control, Message};
use crate::session::{
    Chat, Event, Inbound, Outcome, Role, Session, SessionError, BUSY_TEXT, REJECT_TEXT,
};
use crate::socket::Transport;
use crate::state::ServerState;

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

/// Admission decision for one SYN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    Rejected,
    Busy,
}

/// Operator approval of a connection request.
///
/// Implemented for any `FnMut(SocketAddr, &str) -> bool`; the `&str` is the
/// user name carried in the SYN.
pub trait Gate {
    fn approve(&mut self, candidate: SocketAddr, user: &str) -> bool;
}

impl<F> Gate for F
where
    F: FnMut(SocketAddr, &str) -> bool,
{
    fn approve(&mut self, candidate: SocketAddr, user: &str) -> bool {
        self(candidate, user)
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub struct Server<T, G> {
    session: Session<T>,
    gate: G,
    state: ServerState,
}

impl<T: Transport, G: Gate> Server<T, G> {
    pub fn new(
        transport: T,
        name: impl Into<String>,
        gate: G,
        config: SessionConfig,
    ) -> Self {
        Self {
            session: Session::new(transport, Role::Server, name, config),
            gate,
            state: ServerState::Listening,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// The bound peer, if any.
    pub fn peer(&self) -> Option<SocketAddr> {
        self.state.peer()
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    /// Decide whether a SYN from `candidate` may proceed.
    ///
    /// Busy while a peer is bound or another candidate is negotiating;
    /// otherwise the gate decides.  Acceptance moves the server to
    /// `Negotiating` without binding the candidate.
    pub fn admit(&mut self, candidate: SocketAddr, user: &str) -> Admission {
        if self.state.is_occupied() {
            return Admission::Busy;
        }
        if self.gate.approve(candidate, user) {
            self.state = ServerState::Negotiating { candidate };
            Admission::Accepted
        } else {
            Admission::Rejected
        }
    }

    /// Listen until a client completes the handshake; returns its address.
    ///
    /// Non-SYN datagrams are ignored while listening.  Rejected candidates
    /// get CONTROL/ERR "Connection rejected" and listening continues.  A
    /// local name that does not fit the header fails before listening starts.
    pub async fn accept(&mut self) -> Result<SocketAddr, SessionError> {
        if self.state != ServerState::Listening {
            return Err(SessionError::BadState(self.state.to_string()));
        }
        codec::check_user(self.session.local_name())?;
        log::info!(
            "[server] listening on {}",
            self.session.transport().local_addr()
        );

        loop {
            let (message, from) = match self.session.recv().await? {
                Inbound::Message(m, from) => (m, from),
                Inbound::Timeout => continue,
            };
            if !message.is(Control::Syn) {
                log::debug!("[server] ignoring {} from {from} while listening", message.kind);
                continue;
            }

            log::info!("[server] {from} ({}) is trying to connect", message.user);
            match self.admit(from, &message.user) {
                Admission::Accepted => {
                    if self.negotiate(from).await? {
                        return Ok(from);
                    }
                }
                Admission::Rejected => {
                    log::info!("[server] rejected {from}");
                    self.session.send_error(REJECT_TEXT, from).await?;
                }
                Admission::Busy => {
                    self.session.send_error(BUSY_TEXT, from).await?;
                }
            }
        }
    }

    /// SYN_ACK / ACK exchange with an admitted candidate.
    ///
    /// Returns `Ok(false)` and falls back to `Listening` when the candidate
    /// never acknowledges.
    async fn negotiate(&mut self, candidate: SocketAddr) -> Result<bool, SessionError> {
        let attempts = self.session.config().handshake_attempts;

        for attempt in 1..=attempts {
            self.session.send_control(Control::SynAck, candidate).await?;
            let deadline = self.session.deadline();

            loop {
                let (message, from) = match self.session.recv_before(deadline).await? {
                    Inbound::Message(m, from) => (m, from),
                    Inbound::Timeout => break,
                };
                if from != candidate {
                    self.session.turn_away(&message, from).await?;
                    continue;
                }
                if message.is(Control::Ack) {
                    self.session.bind_peer(candidate);
                    self.state = ServerState::Established { peer: candidate };
                    log::info!("[server] chatting with {candidate} ({})", message.user);
                    return Ok(true);
                }
                if message.is(Control::Syn) {
                    // Our SYN_ACK was lost; answer again without re-asking.
                    self.session.send_control(Control::SynAck, candidate).await?;
                    continue;
                }
                log::debug!("[server] ignoring {} while negotiating", message.kind);
            }
            log::warn!("[server] no ACK from {candidate} (attempt {attempt}/{attempts})");
        }

        self.state = ServerState::Listening;
        Ok(false)
    }

    /// Block until the bound peer sends a CHAT or FIN.
    pub async fn next_event(&mut self) -> Result<Event, SessionError> {
        if !matches!(self.state, ServerState::Established { .. }) {
            return Err(SessionError::BadState(self.state.to_string()));
        }
        loop {
            match self.session.next_event().await {
                Ok(Some(Event::Closed)) => {
                    log::info!("[server] client closed the connection");
                    self.finish();
                    return Ok(Event::Closed);
                }
                Ok(Some(event)) => return Ok(event),
                Ok(None) => continue,
                Err(e) => {
                    self.finish();
                    return Err(e);
                }
            }
        }
    }

    /// Send one CHAT to the bound peer reliably.
    ///
    /// An [`SessionError::Encode`] failure keeps the session established;
    /// any other failure ends it.
    pub async fn send_chat(&mut self, text: &str) -> Result<Outcome, SessionError> {
        if !matches!(self.state, ServerState::Established { .. }) {
            return Err(SessionError::BadState(self.state.to_string()));
        }
        let message = Message::chat(self.session.local_name(), text);
        let result = self.session.send_reliable(message).await;
        if let Err(e) = &result {
            if !matches!(e, SessionError::Encode(_)) {
                self.finish();
            }
        }
        result
    }

    /// Server-initiated teardown: FIN, then wait for ACK.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        let peer = match self.state {
            ServerState::Established { peer } => peer,
            ServerState::Closed => return Ok(()),
            other => return Err(SessionError::BadState(other.to_string())),
        };
        self.state = ServerState::Closing { peer };
        let result = self.session.teardown().await;
        self.finish();
        result
    }

    /// Accept one client and chat until either side closes.
    ///
    /// The chat starts with the client's message; each received CHAT is
    /// displayed and answered with one composed line.
    pub async fn run<C: Chat>(&mut self, chat: &mut C) -> Result<(), SessionError> {
        if self.state == ServerState::Listening {
            let peer = self.accept().await?;
            chat.notice(&format!("Chatting with {peer}"));
        }

        loop {
            match self.next_event().await? {
                Event::Closed => {
                    chat.notice("Client closed the connection");
                    return Ok(());
                }
                Event::Chat(message) => {
                    if message.is_retransmission() {
                        chat.notice("Message arrived on a retry");
                    }
                    chat.display(&message);
                }
            }

            // Compose until one line goes out or the operator leaves.
            loop {
                let line = match chat.compose() {
                    Some(line) if !self.session.config().is_exit(&line) => line,
                    _ => {
                        self.close().await?;
                        chat.notice("Connection ended");
                        return Ok(());
                    }
                };
                match self.send_chat(line.trim()).await {
                    Ok(_) => break,
                    Err(SessionError::Encode(e)) => {
                        chat.notice(&format!("Message not sent: {e}"));
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    fn finish(&mut self) {
        self.state = ServerState::Closed;
        self.session.unbind_peer();
    }
}
