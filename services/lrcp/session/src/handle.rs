//! Application-side handle to a session.
//!
//! Handles never touch session state directly. Every operation is a
//! [`Command`] posted to the server loop, answered over a oneshot channel.

use bytes::Bytes;
use std::net::SocketAddr;
use tokio::sync::{mpsc, oneshot};

use crate::bridge::RecordReply;
use crate::error::SessionError;

/// Request from the application to the server loop
#[derive(Debug)]
pub enum Command {
    /// Reliably send bytes to the peer
    Write {
        /// Session ID
        session: u32,
        /// Epoch the handle was issued for
        epoch: u64,
        /// Bytes to send
        data: Bytes,
        /// Outcome of queueing the bytes
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// Pull the next complete record
    NextRecord {
        /// Session ID
        session: u32,
        /// Epoch the handle was issued for
        epoch: u64,
        /// Record, or `None` at end-of-stream
        reply: RecordReply,
    },
    /// Close the session from the application side
    Close {
        /// Session ID
        session: u32,
        /// Epoch the handle was issued for
        epoch: u64,
    },
}

/// Handle given to the application for each accepted session
#[derive(Debug)]
pub struct SessionHandle {
    id: u32,
    epoch: u64,
    peer: SocketAddr,
    commands: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    pub(crate) fn new(
        id: u32,
        epoch: u64,
        peer: SocketAddr,
        commands: mpsc::UnboundedSender<Command>,
    ) -> Self {
        Self {
            id,
            epoch,
            peer,
            commands,
        }
    }

    /// Session ID
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Peer address recorded when the session was created
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Wait for the next newline-terminated record.
    ///
    /// Returns `None` once the session is closed.
    pub async fn next_record(&mut self) -> Option<String> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::NextRecord {
                session: self.id,
                epoch: self.epoch,
                reply,
            })
            .ok()?;
        rx.await.ok().flatten()
    }

    /// Queue bytes for reliable, in-order delivery to the peer
    pub async fn write(&self, data: impl Into<Bytes>) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Write {
                session: self.id,
                epoch: self.epoch,
                data: data.into(),
                reply,
            })
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Close the session
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close {
            session: self.id,
            epoch: self.epoch,
        });
    }
}
