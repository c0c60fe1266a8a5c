//! Session error types.

use lrcp_wire::WireError;
use thiserror::Error;

/// Errors surfaced to the application through a session handle
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The session is closed, or the handle refers to a session that no longer exists
    #[error("session closed")]
    Closed,

    /// Outbound bytes could not be framed
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}
