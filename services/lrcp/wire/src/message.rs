//! Message framing for the wire protocol.
//!
//! Every datagram carries exactly one message. Messages are ASCII text,
//! framed by a leading and trailing `/`, with fields separated by `/`:
//!
//! ```text
//! /connect/SESSION/
//! /close/SESSION/
//! /data/SESSION/POSITION/PAYLOAD/
//! /ack/SESSION/LENGTH/
//! ```
//!
//! Numeric fields are unsigned decimal integers below 2^31. A message of
//! [`MAX_MESSAGE_SIZE`] bytes or more is invalid in both directions.

use crate::error::WireError;
use crate::escape::{escape_into, escaped_len, unescape};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Frame and field separator
pub const SEPARATOR: u8 = b'/';
/// Payload escape character
pub const ESCAPE: u8 = b'\\';
/// Messages of this many bytes or more are invalid
pub const MAX_MESSAGE_SIZE: usize = 1000;
/// Largest value a numeric field may carry (2^31 - 1)
pub const MAX_NUMERIC: u32 = i32::MAX as u32;

const CONNECT: &[u8] = b"connect";
const CLOSE: &[u8] = b"close";
const DATA: &[u8] = b"data";
const ACK: &[u8] = b"ack";

/// Message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Open (or re-acknowledge) a session
    Connect,
    /// Tear down a session
    Close,
    /// Carry stream bytes at a position
    Data,
    /// Cumulative acknowledgment
    Ack,
}

impl MessageType {
    fn tag(self) -> &'static [u8] {
        match self {
            MessageType::Connect => CONNECT,
            MessageType::Close => CLOSE,
            MessageType::Data => DATA,
            MessageType::Ack => ACK,
        }
    }

    fn name(self) -> &'static str {
        match self {
            MessageType::Connect => "connect",
            MessageType::Close => "close",
            MessageType::Data => "data",
            MessageType::Ack => "ack",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded wire message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// `/connect/SESSION/`
    Connect {
        /// Session ID
        session: u32,
    },
    /// `/close/SESSION/`
    Close {
        /// Session ID
        session: u32,
    },
    /// `/data/SESSION/POSITION/PAYLOAD/`
    Data {
        /// Session ID
        session: u32,
        /// Stream offset of the first payload byte
        position: u32,
        /// Unescaped payload bytes
        payload: Bytes,
    },
    /// `/ack/SESSION/LENGTH/`
    Ack {
        /// Session ID
        session: u32,
        /// Total contiguous bytes received
        length: u32,
    },
}

impl Message {
    /// Build a CONNECT message
    pub fn connect(session: u32) -> Self {
        Message::Connect { session }
    }

    /// Build a CLOSE message
    pub fn close(session: u32) -> Self {
        Message::Close { session }
    }

    /// Build a DATA message
    pub fn data(session: u32, position: u32, payload: impl Into<Bytes>) -> Self {
        Message::Data {
            session,
            position,
            payload: payload.into(),
        }
    }

    /// Build an ACK message
    pub fn ack(session: u32, length: u32) -> Self {
        Message::Ack { session, length }
    }

    /// Message type
    pub fn typ(&self) -> MessageType {
        match self {
            Message::Connect { .. } => MessageType::Connect,
            Message::Close { .. } => MessageType::Close,
            Message::Data { .. } => MessageType::Data,
            Message::Ack { .. } => MessageType::Ack,
        }
    }

    /// Session ID the message is addressed to
    pub fn session(&self) -> u32 {
        match *self {
            Message::Connect { session }
            | Message::Close { session }
            | Message::Data { session, .. }
            | Message::Ack { session, .. } => session,
        }
    }

    /// Get the total message size when encoded
    pub fn encoded_size(&self) -> usize {
        // leading separator, tag, separator after tag, session, trailing separator
        let mut size = 1 + self.typ().tag().len() + 1 + decimal_len(self.session()) + 1;
        match self {
            Message::Connect { .. } | Message::Close { .. } => {}
            Message::Data {
                position, payload, ..
            } => size += decimal_len(*position) + 1 + escaped_len(payload) + 1,
            Message::Ack { length, .. } => size += decimal_len(*length) + 1,
        }
        size
    }

    /// Encode the message to a contiguous buffer.
    ///
    /// Fails with [`WireError::Size`] if the encoded message would reach
    /// [`MAX_MESSAGE_SIZE`], and with [`WireError::Numeric`] if a numeric
    /// field is above [`MAX_NUMERIC`].
    pub fn encode(&self) -> Result<Bytes, WireError> {
        let total_size = self.encoded_size();
        if total_size >= MAX_MESSAGE_SIZE {
            return Err(WireError::Size(total_size));
        }

        let mut buf = BytesMut::with_capacity(total_size);
        buf.put_u8(SEPARATOR);
        buf.put_slice(self.typ().tag());
        buf.put_u8(SEPARATOR);
        put_numeric(&mut buf, self.session())?;
        buf.put_u8(SEPARATOR);

        match self {
            Message::Connect { .. } | Message::Close { .. } => {}
            Message::Data {
                position, payload, ..
            } => {
                put_numeric(&mut buf, *position)?;
                buf.put_u8(SEPARATOR);
                escape_into(&mut buf, payload);
                buf.put_u8(SEPARATOR);
            }
            Message::Ack { length, .. } => {
                put_numeric(&mut buf, *length)?;
                buf.put_u8(SEPARATOR);
            }
        }

        debug_assert_eq!(buf.len(), total_size);
        Ok(buf.freeze())
    }

    /// Decode one message from a datagram
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() >= MAX_MESSAGE_SIZE {
            return Err(WireError::Size(buf.len()));
        }
        if buf.len() < 2 || buf[0] != SEPARATOR || buf[buf.len() - 1] != SEPARATOR {
            return Err(WireError::Unframed);
        }

        let body = &buf[1..buf.len() - 1];
        let mut parts = body.splitn(2, |&b| b == SEPARATOR);
        let tag = parts.next().unwrap_or_default();
        let rest = parts.next();

        match tag {
            CONNECT => {
                let session = parse_numeric(rest.ok_or(WireError::Fields("connect"))?)?;
                Ok(Message::Connect { session })
            }
            CLOSE => {
                let session = parse_numeric(rest.ok_or(WireError::Fields("close"))?)?;
                Ok(Message::Close { session })
            }
            ACK => {
                let rest = rest.ok_or(WireError::Fields("ack"))?;
                let mut fields = rest.splitn(2, |&b| b == SEPARATOR);
                let session = fields.next().ok_or(WireError::Fields("ack"))?;
                let length = fields.next().ok_or(WireError::Fields("ack"))?;
                Ok(Message::Ack {
                    session: parse_numeric(session)?,
                    length: parse_numeric(length)?,
                })
            }
            DATA => {
                let rest = rest.ok_or(WireError::Fields("data"))?;
                let mut fields = rest.splitn(3, |&b| b == SEPARATOR);
                let session = fields.next().ok_or(WireError::Fields("data"))?;
                let position = fields.next().ok_or(WireError::Fields("data"))?;
                let payload = fields.next().ok_or(WireError::Fields("data"))?;
                Ok(Message::Data {
                    session: parse_numeric(session)?,
                    position: parse_numeric(position)?,
                    payload: unescape(payload)?,
                })
            }
            other => Err(WireError::Type(String::from_utf8_lossy(other).into_owned())),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Connect { session } => write!(f, "connect({})", session),
            Message::Close { session } => write!(f, "close({})", session),
            Message::Data {
                session,
                position,
                payload,
            } => write!(f, "data({}, pos={}, len={})", session, position, payload.len()),
            Message::Ack { session, length } => write!(f, "ack({}, len={})", session, length),
        }
    }
}

/// Number of decimal digits in `n`
pub fn decimal_len(n: u32) -> usize {
    let mut n = n;
    let mut len = 1;
    while n >= 10 {
        n /= 10;
        len += 1;
    }
    len
}

fn put_numeric(buf: &mut BytesMut, n: u32) -> Result<(), WireError> {
    if n > MAX_NUMERIC {
        return Err(WireError::Numeric(n.to_string()));
    }
    buf.put_slice(n.to_string().as_bytes());
    Ok(())
}

fn parse_numeric(field: &[u8]) -> Result<u32, WireError> {
    let invalid = || WireError::Numeric(String::from_utf8_lossy(field).into_owned());

    // 10 digits is enough for MAX_NUMERIC; longer fields cannot be in range
    // unless zero-padded, which is tolerated.
    let digits = match field.iter().position(|&b| b != b'0') {
        Some(first) => &field[first..],
        None if !field.is_empty() => return Ok(0),
        None => return Err(invalid()),
    };
    if digits.len() > 10 || !digits.iter().all(u8::is_ascii_digit) {
        return Err(invalid());
    }

    let value = digits
        .iter()
        .fold(0u64, |acc, &d| acc * 10 + u64::from(d - b'0'));
    if value > u64::from(MAX_NUMERIC) {
        return Err(invalid());
    }
    Ok(value as u32)
}
