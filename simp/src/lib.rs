//! `simp` — a minimal chat protocol with stop-and-wait reliability over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────┐                  ┌──────────┐
//!  │  Client  │                  │  Server  │──── Gate (admission)
//!  └────┬─────┘                  └─────┬────┘
//!       │                              │
//!  ┌────▼──────────────────────────────▼──┐
//!  │               Session                │
//!  │   Sender (stop-and-wait) + Receiver  │
//!  └────┬─────────────────────────────────┘
//!       │ Message ⇄ bytes (codec)
//!  ┌────▼──────┐
//!  │ Transport │  Socket (tokio UdpSocket) or Simulator
//!  └───────────┘
//! ```
//!
//! Each module has a single responsibility:
//! - [`message`]    — typed protocol unit
//! - [`codec`]      — 39-byte header wire format
//! - [`socket`]     — datagram transport with bounded receive
//! - [`simulator`]  — lossy transport wrapper for testing
//! - [`sender`]     — stop-and-wait outbound state
//! - [`receiver`]   — inbound backlog and duplicate detection
//! - [`session`]    — acknowledgement, reliable send, teardown
//! - [`state`]      — client and server state machine types
//! - [`client`]     — client handshake and chat loop
//! - [`server`]     — admission control, handshake and chat loop
//! - [`config`]     — timeouts and retry bounds

pub mod client;
pub mod codec;
pub mod config;
pub mod message;
pub mod receiver;
pub mod sender;
pub mod server;
pub mod session;
pub mod simulator;
pub mod socket;
pub mod state;

pub use client::Client;
pub use config::SessionConfig;
pub use message::{Control, Kind, Message, MessageType, Sequence};
pub use server::{Admission, Gate, Server};
pub use session::{Chat, Event, Outcome, SessionError};
pub use socket::{Socket, Transport, TransportError};
