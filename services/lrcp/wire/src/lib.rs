//! Textual wire framing, escaping, size limits and DATA chunking for LRCP.
//!
//! This crate provides the wire protocol implementation for LRCP sessions:
//! parsing and serializing the four message types, payload escaping, and
//! cutting outbound stream bytes into DATA messages that always fit the
//! datagram ceiling.
//!
//! ## Wire Format
//!
//! ```text
//! /connect/SESSION/
//! /close/SESSION/
//! /data/SESSION/POSITION/PAYLOAD/     PAYLOAD escapes `\` as `\\` and `/` as `\/`
//! /ack/SESSION/LENGTH/
//! ```
//!
//! One message per datagram. Numeric fields are decimal and below 2^31.
//! Anything of 1000 bytes or more is invalid.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod error;
pub mod escape;
pub mod message;

// Re-export main types
pub use chunk::{DataChunker, MAX_DATA_CHUNK};
pub use error::WireError;
pub use escape::{escape, escaped_len, unescape};
pub use message::{Message, MessageType, ESCAPE, MAX_MESSAGE_SIZE, MAX_NUMERIC, SEPARATOR};
