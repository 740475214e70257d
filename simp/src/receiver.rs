//! Inbound bookkeeping for stop-and-wait.
//!
//! The [`Receiver`] handles what happens *after* a datagram from the bound
//! peer is decoded and acknowledged and *before* the application sees it:
//! - Holding messages that arrived while the local side was waiting for an
//!   ACK of its own message (the backlog), in arrival order.
//! - Detecting retransmitted CHAT messages that were already delivered
//!   because only the ACK was lost.
//!
//! The [`Receiver`] does **not** send ACKs itself.

use std::collections::VecDeque;

use crate::message::Message;

/// Outcome of classifying an inbound CHAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Fresh,
    /// Retransmission of the CHAT delivered last; already acknowledged.
    Duplicate,
}

#[derive(Debug, Default)]
pub struct Receiver {
    backlog: VecDeque<Message>,
    last_chat: Option<Message>,
}

impl Receiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an already-acknowledged message for later delivery.
    pub fn defer(&mut self, message: Message) {
        self.backlog.push_back(message);
    }

    pub fn next_deferred(&mut self) -> Option<Message> {
        self.backlog.pop_front()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Classify `message` and remember it if it is a fresh CHAT.
    ///
    /// A CHAT is a duplicate only when it is marked as a retransmission and
    /// repeats the previous CHAT's sender and text.  CONTROL messages are
    /// always fresh.
    ///
    /// The sequence field does not alternate, so a new CHAT that repeats the
    /// previous text and arrives only on its retry is indistinguishable from
    /// a lost-ACK retransmission.  It is acknowledged and swallowed.
    pub fn on_message(&mut self, message: &Message) -> Delivery {
        if !message.is_chat() {
            return Delivery::Fresh;
        }
        if message.is_retransmission() {
            if let Some(last) = &self.last_chat {
                if last.user == message.user && last.payload == message.payload {
                    return Delivery::Duplicate;
                }
            }
        }
        self.last_chat = Some(message.clone());
        Delivery::Fresh
    }
}
