//! Client side of a SIMP session.
//!
//! ```ignore
//! let socket = Socket::bind("0.0.0.0:0").await?;
//! let mut client = Client::new(socket, server_addr, "bob", SessionConfig::default());
//! client.connect().await?;
//! client.send_chat("hi").await?;
//! let reply = client.next_event().await?;
//! client.close().await?;
//! ```

use std::net::SocketAddr;

use crate::codec;
use crate::config::SessionConfig;
use crate::message::{Control, Message};
use crate::session::{Chat, Event, Inbound, Outcome, Role, Session, SessionError};
use crate::socket::Transport;
use crate::state::ClientState;

pub struct Client<T> {
    session: Session<T>,
    server: SocketAddr,
    state: ClientState,
}

impl<T: Transport> Client<T> {
    pub fn new(
        transport: T,
        server: SocketAddr,
        name: impl Into<String>,
        config: SessionConfig,
    ) -> Self {
        Self {
            session: Session::new(transport, Role::Client, name, config),
            server,
            state: ClientState::Disconnected,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn session(&self) -> &Session<T> {
        &self.session
    }

    pub fn server(&self) -> SocketAddr {
        self.server
    }

    /// Three-way handshake: send SYN, wait for SYN_ACK, answer ACK.
    ///
    /// SYN is resent on timeout up to `handshake_attempts` times.  A
    /// CONTROL/ERR from the server (busy or rejected) ends the session with
    /// [`SessionError::Refused`].
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        if self.state != ClientState::Disconnected {
            return Err(SessionError::BadState(self.state.to_string()));
        }
        if let Err(e) = codec::check_user(self.session.local_name()) {
            self.state = ClientState::Closed;
            return Err(e.into());
        }
        self.state = ClientState::Handshaking;
        let attempts = self.session.config().handshake_attempts;

        for attempt in 1..=attempts {
            self.session.send_control(Control::Syn, self.server).await?;
            let deadline = self.session.deadline();

            loop {
                let (message, from) = match self.session.recv_before(deadline).await {
                    Ok(Inbound::Message(m, from)) => (m, from),
                    Ok(Inbound::Timeout) => break,
                    Err(e) => {
                        self.state = ClientState::Closed;
                        return Err(e);
                    }
                };
                if from != self.server {
                    self.session.turn_away(&message, from).await?;
                    continue;
                }
                if message.is(Control::SynAck) {
                    self.session.send_control(Control::Ack, self.server).await?;
                    self.session.bind_peer(self.server);
                    self.state = ClientState::Established;
                    log::info!("[client] connected to {} ({})", self.server, message.user);
                    return Ok(());
                }
                if message.is(Control::Err) {
                    self.state = ClientState::Closed;
                    log::info!("[client] server refused: {}", message.payload);
                    return Err(SessionError::Refused(message.payload));
                }
                log::debug!("[client] ignoring {} during handshake", message.kind);
            }
            log::warn!("[client] no answer to SYN (attempt {attempt}/{attempts})");
        }

        self.state = ClientState::Closed;
        Err(SessionError::HandshakeFailed { attempts })
    }

    /// Send one CHAT reliably.
    ///
    /// Text the wire format cannot carry fails with [`SessionError::Encode`]
    /// and leaves the session established.  Any other failure closes it.
    pub async fn send_chat(&mut self, text: &str) -> Result<Outcome, SessionError> {
        if self.state != ClientState::Established {
            return Err(SessionError::BadState(self.state.to_string()));
        }
        let message = Message::chat(self.session.local_name(), text);
        let result = self.session.send_reliable(message).await;
        if let Err(e) = &result {
            if !matches!(e, SessionError::Encode(_)) {
                self.state = ClientState::Closed;
                self.session.unbind_peer();
            }
        }
        result
    }

    /// Block until the server sends a CHAT or FIN.
    ///
    /// FIN is acknowledged and moves the client to `Closed`.  CONTROL/ERR is
    /// fatal.
    pub async fn next_event(&mut self) -> Result<Event, SessionError> {
        if self.state != ClientState::Established {
            return Err(SessionError::BadState(self.state.to_string()));
        }
        loop {
            match self.session.next_event().await {
                Ok(Some(Event::Closed)) => {
                    log::info!("[client] server closed the connection");
                    self.state = ClientState::Closed;
                    self.session.unbind_peer();
                    return Ok(Event::Closed);
                }
                Ok(Some(event)) => return Ok(event),
                Ok(None) => continue,
                Err(e) => {
                    self.state = ClientState::Closed;
                    return Err(e);
                }
            }
        }
    }

    /// Send FIN and wait for its ACK.
    ///
    /// Calling `close` on a session that never connected or already closed
    /// sends nothing.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        match self.state {
            ClientState::Disconnected | ClientState::Closed => return Ok(()),
            ClientState::Established => {}
            other => return Err(SessionError::BadState(other.to_string())),
        }
        self.state = ClientState::Closing;
        let result = self.session.teardown().await;
        self.state = ClientState::Closed;
        self.session.unbind_peer();
        result
    }

    /// Drive a whole chat: connect if needed, then alternate between sending
    /// a composed line and displaying the server's answer until either side
    /// closes.
    pub async fn run<C: Chat>(&mut self, chat: &mut C) -> Result<(), SessionError> {
        if self.state == ClientState::Disconnected {
            self.connect().await?;
            chat.notice("Connection established");
        }

        loop {
            let line = match chat.compose() {
                Some(line) if !self.session.config().is_exit(&line) => line,
                _ => {
                    self.close().await?;
                    chat.notice("Closing connection");
                    return Ok(());
                }
            };

            match self.send_chat(line.trim()).await {
                Ok(_) => {}
                Err(SessionError::Encode(e)) => {
                    chat.notice(&format!("Message not sent: {e}"));
                    continue;
                }
                Err(e) => return Err(e),
            }

            match self.next_event().await? {
                Event::Chat(message) => {
                    if message.is_retransmission() {
                        chat.notice("Message arrived on a retry");
                    }
                    chat.display(&message);
                }
                Event::Closed => {
                    chat.notice("Server closed the connection");
                    return Ok(());
                }
            }
        }
    }
}
