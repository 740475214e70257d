//! Wire format for SIMP datagrams.
//!
//! Pure data transformation: no I/O happens here.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  offset  size  field
//!  ------  ----  ---------------------------------------------
//!       0     1  type       (1 = CONTROL, 2 = CHAT)
//!       1     1  operation  (1 = ERR/CONST, 2 = SYN, 4 = ACK,
//!                            6 = SYN_ACK, 8 = FIN)
//!       2     1  sequence   (0 = OK, 1 = ERR)
//!       3    32  user       ASCII, zero-padded
//!      35     4  length     payload byte count
//!      39     n  payload    ASCII, exactly `length` bytes
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 39 bytes.  One message per datagram;
//! no fragmentation and no checksum.

use thiserror::Error;

use crate::message::{Kind, Message, MessageType, Sequence};

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 39;

/// Width of the zero-padded `user` field.
pub const USER_LEN: usize = 32;

/// Largest datagram either peer will send or read.
pub const MAX_DATAGRAM: usize = 1024;

/// Largest payload that still fits in one datagram.
pub const MAX_PAYLOAD: usize = MAX_DATAGRAM - HEADER_LEN;

const OFF_TYPE: usize = 0;
const OFF_OPERATION: usize = 1;
const OFF_SEQUENCE: usize = 2;
const OFF_USER: usize = 3;
const OFF_LENGTH: usize = 35;

/// Errors raised while serialising a [`Message`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("user name is {0} bytes, limit is {limit}", limit = USER_LEN)]
    UserTooLong(usize),
    #[error("{field} is not ASCII")]
    NonAscii { field: &'static str },
    #[error("payload is {0} bytes, limit is {limit}", limit = MAX_PAYLOAD)]
    PayloadTooLarge(usize),
}

/// Errors raised while parsing a raw datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("datagram of {0} bytes is shorter than the {header}-byte header", header = HEADER_LEN)]
    BufferTooShort(usize),
    #[error("unknown message type {0}")]
    UnknownType(u8),
    #[error("operation {op} is not valid for {kind:?} messages")]
    UnknownOperation { kind: MessageType, op: u8 },
    #[error("unknown sequence value {0}")]
    UnknownSequence(u8),
    #[error("length field declares {declared} payload bytes, datagram has {actual}")]
    LengthMismatch { declared: u32, actual: usize },
    #[error("{field} is not ASCII")]
    NonAscii { field: &'static str },
}

/// Serialise `message` into a newly allocated buffer of
/// `HEADER_LEN + message.payload.len()` bytes.
pub fn encode(message: &Message) -> Result<Vec<u8>, EncodeError> {
    check_user(&message.user)?;
    if !message.payload.is_ascii() {
        return Err(EncodeError::NonAscii { field: "payload" });
    }
    let payload = message.payload.as_bytes();
    if payload.len() > MAX_PAYLOAD {
        return Err(EncodeError::PayloadTooLarge(payload.len()));
    }

    let mut buf = vec![0u8; HEADER_LEN + payload.len()];
    buf[OFF_TYPE] = message.kind.message_type() as u8;
    buf[OFF_OPERATION] = message.kind.operation();
    buf[OFF_SEQUENCE] = message.sequence as u8;
    // Remainder of the user field stays zero.
    buf[OFF_USER..OFF_USER + message.user.len()].copy_from_slice(message.user.as_bytes());
    buf[OFF_LENGTH..OFF_LENGTH + 4].copy_from_slice(&(payload.len() as u32).to_be_bytes());
    buf[HEADER_LEN..].copy_from_slice(payload);

    Ok(buf)
}

/// Check that `user` fits the `user` header field: ASCII, at most
/// [`USER_LEN`] bytes.
pub fn check_user(user: &str) -> Result<(), EncodeError> {
    if !user.is_ascii() {
        return Err(EncodeError::NonAscii { field: "user" });
    }
    if user.len() > USER_LEN {
        return Err(EncodeError::UserTooLong(user.len()));
    }
    Ok(())
}

/// Parse a [`Message`] from one received datagram.
pub fn decode(buf: &[u8]) -> Result<Message, DecodeError> {
    if buf.len() < HEADER_LEN {
        return Err(DecodeError::BufferTooShort(buf.len()));
    }

    let message_type =
        MessageType::try_from(buf[OFF_TYPE]).map_err(DecodeError::UnknownType)?;
    let op = buf[OFF_OPERATION];
    let kind = Kind::from_wire(message_type, op).ok_or(DecodeError::UnknownOperation {
        kind: message_type,
        op,
    })?;
    let sequence =
        Sequence::try_from(buf[OFF_SEQUENCE]).map_err(DecodeError::UnknownSequence)?;

    let user_field = &buf[OFF_USER..OFF_USER + USER_LEN];
    let user_end = user_field
        .iter()
        .rposition(|&b| b != 0)
        .map_or(0, |i| i + 1);
    let user = ascii_string(&user_field[..user_end], "user")?;

    let mut length = [0u8; 4];
    length.copy_from_slice(&buf[OFF_LENGTH..OFF_LENGTH + 4]);
    let declared = u32::from_be_bytes(length);
    let body = &buf[HEADER_LEN..];
    if body.len() != declared as usize {
        return Err(DecodeError::LengthMismatch {
            declared,
            actual: body.len(),
        });
    }
    let payload = ascii_string(body, "payload")?;

    Ok(Message {
        kind,
        sequence,
        user,
        payload,
    })
}

fn ascii_string(bytes: &[u8], field: &'static str) -> Result<String, DecodeError> {
    if !bytes.is_ascii() {
        return Err(DecodeError::NonAscii { field });
    }
    // ASCII is always valid UTF-8.
    String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::NonAscii { field })
}
