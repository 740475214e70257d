//! Session finite-state machine types.
//!
//! Transitions are driven by [`crate::client`] and [`crate::server`]; this
//! module only names the states.
//!
//! ```text
//!  client:  Disconnected ──SYN──▶ Handshaking ──SYN_ACK/ACK──▶ Established
//!                                      │                           │
//!                                ERR / attempts              FIN sent or
//!                                 exhausted                  FIN received
//!                                      ▼                           ▼
//!                                   Closed ◀────────ACK──────── Closing
//!
//!  server:  Listening ──SYN, Accepted──▶ Negotiating ──ACK──▶ Established
//!              ▲                              │                    │
//!              └──── timeout / Rejected ──────┘              FIN / ERR
//!                                                                  ▼
//!                                             Closed ◀──────── Closing
//! ```

use std::fmt;
use std::net::SocketAddr;

/// Client lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    /// Nothing sent yet.
    #[default]
    Disconnected,
    /// SYN sent; waiting for SYN_ACK or ERR.
    Handshaking,
    /// Handshake complete; chat in progress.
    Established,
    /// FIN exchanged; waiting for the final ACK.
    Closing,
    /// Terminal.  The session cannot be reused.
    Closed,
}

/// Server lifecycle.  The bound peer lives inside the state that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerState {
    /// No peer bound; waiting for a SYN.
    #[default]
    Listening,
    /// Candidate admitted and SYN_ACK sent; not bound until its ACK arrives.
    Negotiating { candidate: SocketAddr },
    Established { peer: SocketAddr },
    Closing { peer: SocketAddr },
    /// Terminal for this process run.
    Closed,
}

impl ServerState {
    /// The bound peer, if any.  A negotiating candidate is not bound.
    pub fn peer(&self) -> Option<SocketAddr> {
        match *self {
            Self::Established { peer } | Self::Closing { peer } => Some(peer),
            _ => None,
        }
    }

    /// `true` while a peer is bound or a candidate is mid-handshake.
    pub fn is_occupied(&self) -> bool {
        matches!(
            self,
            Self::Negotiating { .. } | Self::Established { .. } | Self::Closing { .. }
        )
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Listening => f.write_str("Listening"),
            Self::Negotiating { candidate } => write!(f, "Negotiating({candidate})"),
            Self::Established { peer } => write!(f, "Established({peer})"),
            Self::Closing { peer } => write!(f, "Closing({peer})"),
            Self::Closed => f.write_str("Closed"),
        }
    }
}
