//! DATA chunking for outbound stream bytes.
//!
//! Application writes can be arbitrarily large, but every DATA message has to
//! stay under [`MAX_MESSAGE_SIZE`] once escaped and framed. The chunker cuts a
//! payload into pieces of at most [`MAX_DATA_CHUNK`] raw bytes and also stops
//! a piece early when its escaped form would not fit alongside the header
//! digits for its session and position.

use crate::error::WireError;
use crate::message::{decimal_len, Message, ESCAPE, MAX_MESSAGE_SIZE, MAX_NUMERIC, SEPARATOR};
use bytes::Bytes;

/// Largest raw payload carried by one DATA message
pub const MAX_DATA_CHUNK: usize = 950;

/// `/data/` + `/` after session + `/` after position + trailing `/`
const DATA_FRAMING: usize = 6 + 1 + 1 + 1;

/// Chunker for splitting stream bytes into DATA messages
#[derive(Debug, Clone)]
pub struct DataChunker {
    max_chunk: usize,
}

impl DataChunker {
    /// Create a new chunker with the default chunk size
    pub fn new() -> Self {
        Self {
            max_chunk: MAX_DATA_CHUNK,
        }
    }

    /// Create a chunker with a smaller raw chunk limit
    pub fn with_max_chunk(max_chunk: usize) -> Self {
        Self {
            max_chunk: max_chunk.clamp(1, MAX_DATA_CHUNK),
        }
    }

    /// Split `payload` into DATA messages for `session`, starting at stream
    /// offset `start`.
    ///
    /// Positions are contiguous: each message starts where the previous one
    /// ended. Fails with [`WireError::Overflow`] if the stream would run past
    /// [`MAX_NUMERIC`].
    pub fn split(&self, session: u32, start: u32, payload: Bytes) -> Result<Vec<Message>, WireError> {
        let end = u64::from(start) + payload.len() as u64;
        if end > u64::from(MAX_NUMERIC) {
            return Err(WireError::Overflow(end));
        }

        let mut messages = Vec::new();
        let mut offset = 0;
        let mut position = start;

        while offset < payload.len() {
            let budget = MAX_MESSAGE_SIZE
                - 1
                - DATA_FRAMING
                - decimal_len(session)
                - decimal_len(position);

            let mut escaped = 0;
            let mut take = 0;
            for &b in payload[offset..].iter().take(self.max_chunk) {
                let width = if b == SEPARATOR || b == ESCAPE { 2 } else { 1 };
                if escaped + width > budget {
                    break;
                }
                escaped += width;
                take += 1;
            }

            let chunk = payload.slice(offset..offset + take);
            messages.push(Message::data(session, position, chunk));
            offset += take;
            position += take as u32;
        }

        Ok(messages)
    }
}

impl Default for DataChunker {
    fn default() -> Self {
        Self::new()
    }
}
