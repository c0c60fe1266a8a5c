//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Message reached the size ceiling
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Missing leading or trailing separator
    #[error("unframed message")]
    Unframed,

    /// Unknown message type
    #[error("unknown type {0:?}")]
    Type(String),

    /// Wrong number of fields for the message type
    #[error("malformed {0} message")]
    Fields(&'static str),

    /// Numeric field is empty, non-decimal or out of range
    #[error("invalid numeric field {0:?}")]
    Numeric(String),

    /// Unescaped separator or dangling escape in a payload
    #[error("bad escape in payload")]
    Escape,

    /// Stream offset would leave the numeric range
    #[error("offset overflow: {0}")]
    Overflow(u64),
}
