//! Outbound state for stop-and-wait reliability.
//!
//! [`Sender`] tracks the single in-flight message.  It does **not** touch the
//! socket; [`crate::session::Session::send_reliable`] calls these methods and
//! owns the actual send/receive loop.
//!
//! # Stop-and-Wait contract
//! - At most **one** message is in flight at any moment (`unacked`).
//! - The first transmission carries `Sequence::Ok`; every retransmission
//!   carries `Sequence::Err` and is otherwise identical.
//! - On ACK: clear `unacked`.
//! - On timeout: retransmit while `tx_count <= max_retries`, then give up.

use std::time::{Duration, Instant};

use crate::message::{Message, Sequence};

/// A message that has been sent but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InFlight {
    pub message: Message,
    /// How many times this message has been transmitted (1 = first send).
    pub tx_count: u32,
    /// Wall-clock time of the first transmission.
    pub first_sent: Instant,
}

/// What to do after the acknowledgement wait expired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timeout {
    /// Send this copy again.
    Retransmit(Message),
    /// Retry bound exhausted after `attempts` transmissions.
    GiveUp { attempts: u32 },
}

/// Stop-and-wait send-side state for one session.
#[derive(Debug)]
pub struct Sender {
    max_retries: u32,
    /// The in-flight message, or `None` when the sender is idle.
    unacked: Option<InFlight>,
}

impl Sender {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            unacked: None,
        }
    }

    /// Place `message` in the in-flight slot and return the copy to transmit.
    ///
    /// Panics in debug mode if a message is already in flight.
    pub fn begin(&mut self, mut message: Message) -> Message {
        debug_assert!(
            self.unacked.is_none(),
            "begin called while a message is already in flight"
        );
        message.sequence = Sequence::Ok;
        self.unacked = Some(InFlight {
            message: message.clone(),
            tx_count: 1,
            first_sent: Instant::now(),
        });
        message
    }

    /// Clear the in-flight slot.  Returns the time since the first send, or
    /// `None` for an ACK with nothing outstanding.
    pub fn on_ack(&mut self) -> Option<Duration> {
        self.unacked.take().map(|e| e.first_sent.elapsed())
    }

    /// Decide between another transmission and giving up.
    ///
    /// Returns `None` when nothing is in flight.
    pub fn on_timeout(&mut self) -> Option<Timeout> {
        let entry = self.unacked.as_mut()?;
        if entry.tx_count > self.max_retries {
            let attempts = entry.tx_count;
            self.unacked = None;
            return Some(Timeout::GiveUp { attempts });
        }
        entry.tx_count += 1;
        entry.message.sequence = Sequence::Err;
        Some(Timeout::Retransmit(entry.message.clone()))
    }

    /// Drop the in-flight message without an ACK, leaving the sender idle.
    ///
    /// Used when the exchange ends early: the peer closed, or the send
    /// itself failed.
    pub fn abandon(&mut self) -> Option<Message> {
        self.unacked.take().map(|e| e.message)
    }

    /// Number of times the in-flight message has been sent, or `0` if idle.
    pub fn tx_count(&self) -> u32 {
        self.unacked.as_ref().map_or(0, |e| e.tx_count)
    }

    pub fn has_unacked(&self) -> bool {
        self.unacked.is_some()
    }
}
