//! In-memory representation of one SIMP protocol unit.
//!
//! A [`Message`] is built immediately before a send or rebuilt immediately
//! after a receive; it is never persisted.  Byte layout lives in
//! [`crate::codec`].
//!
//! # Type / operation aliasing
//!
//! On the wire `operation = 1` means `ERR` for CONTROL messages and `CONST`
//! for CHAT messages.  [`Kind`] folds the two header fields into a single
//! discriminant so an operation code is never interpreted without its type.

use std::fmt;

/// Wire value of the `type` header field.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Control = 1,
    Chat = 2,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Control),
            2 => Ok(Self::Chat),
            other => Err(other),
        }
    }
}

/// CONTROL operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    /// Handshake initiation.
    Syn,
    /// Handshake response.
    SynAck,
    /// Acknowledgement of the previous message.
    Ack,
    /// Teardown request.
    Fin,
    /// Rejection, busy notice, or application error; payload carries the text.
    Err,
}

impl Control {
    /// Wire value of the `operation` header field.
    pub const fn code(self) -> u8 {
        match self {
            Self::Err => 1,
            Self::Syn => 2,
            Self::Ack => 4,
            Self::SynAck => 6,
            Self::Fin => 8,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Err),
            2 => Some(Self::Syn),
            4 => Some(Self::Ack),
            6 => Some(Self::SynAck),
            8 => Some(Self::Fin),
            _ => None,
        }
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Syn => "SYN",
            Self::SynAck => "SYN_ACK",
            Self::Ack => "ACK",
            Self::Fin => "FIN",
            Self::Err => "ERR",
        };
        f.write_str(name)
    }
}

/// Operation code carried by every CHAT message ("this is data").
pub const CHAT_CONST: u8 = 1;

/// The `(type, operation)` pair as one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Control(Control),
    Chat,
}

impl Kind {
    pub const fn message_type(self) -> MessageType {
        match self {
            Self::Control(_) => MessageType::Control,
            Self::Chat => MessageType::Chat,
        }
    }

    pub const fn operation(self) -> u8 {
        match self {
            Self::Control(op) => op.code(),
            Self::Chat => CHAT_CONST,
        }
    }

    /// Resolve a header's type and operation bytes together.
    ///
    /// Returns `None` when either byte is outside its enumeration or the pair
    /// is not a legal combination (e.g. a CHAT with operation `SYN`).
    pub fn from_wire(message_type: MessageType, operation: u8) -> Option<Self> {
        match message_type {
            MessageType::Control => Control::from_code(operation).map(Self::Control),
            MessageType::Chat if operation == CHAT_CONST => Some(Self::Chat),
            MessageType::Chat => None,
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Control(op) => write!(f, "CONTROL/{op}"),
            Self::Chat => f.write_str("CHAT"),
        }
    }
}

/// The one-bit stop-and-wait discriminator.
///
/// `Ok` marks a first transmission, `Err` a retransmission.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Sequence {
    #[default]
    Ok = 0,
    Err = 1,
}

impl TryFrom<u8> for Sequence {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Ok),
            1 => Ok(Self::Err),
            other => Err(other),
        }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("OK"),
            Self::Err => f.write_str("ERR"),
        }
    }
}

/// One protocol unit.
///
/// The header's `length` field is not stored; it is always `payload.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: Kind,
    pub sequence: Sequence,
    /// Display name of the sender.
    pub user: String,
    /// ASCII text; empty for most CONTROL messages.
    pub payload: String,
}

impl Message {
    /// A CONTROL message with an empty payload.
    pub fn control(op: Control, user: impl Into<String>) -> Self {
        Self {
            kind: Kind::Control(op),
            sequence: Sequence::Ok,
            user: user.into(),
            payload: String::new(),
        }
    }

    /// A CONTROL/ERR message carrying a human-readable reason.
    pub fn error(user: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            payload: reason.into(),
            ..Self::control(Control::Err, user)
        }
    }

    pub fn chat(user: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            kind: Kind::Chat,
            sequence: Sequence::Ok,
            user: user.into(),
            payload: text.into(),
        }
    }

    /// Declared payload length as written into the header.
    pub fn length(&self) -> usize {
        self.payload.len()
    }

    pub fn message_type(&self) -> MessageType {
        self.kind.message_type()
    }

    /// `true` for CONTROL messages carrying `op`.
    pub fn is(&self, op: Control) -> bool {
        self.kind == Kind::Control(op)
    }

    pub fn is_chat(&self) -> bool {
        self.kind == Kind::Chat
    }

    pub fn is_retransmission(&self) -> bool {
        self.sequence == Sequence::Err
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]: {}", self.user, self.payload)
    }
}
