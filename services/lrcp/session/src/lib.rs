//! LRCP sessions: reliable, ordered byte streams over UDP.
//!
//! This crate holds the server side of the protocol. Datagrams are decoded
//! with `lrcp-wire`, matched to sessions by numeric ID, acknowledged
//! cumulatively and, for application output, retransmitted until the peer
//! acknowledges them or the session expires.
//!
//! ## Features
//!
//! - **Session state machine**: in-order receive, cumulative ACKs, per-segment retransmission
//! - **Timers**: retransmit interval and session expiry, cancelled on ACK or close
//! - **Record bridge**: newline-delimited records handed to the application on demand
//! - **Single-task server loop**: no locks around session state
//!
//! ## Example
//!
//! ```rust,no_run
//! use lrcp_session::{Server, SessionConfig, SessionHandle, UdpTransport};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let transport = UdpTransport::bind("0.0.0.0:7000".parse()?).await?;
//!
//! let echo = |mut handle: SessionHandle| {
//!     tokio::spawn(async move {
//!         while let Some(line) = handle.next_record().await {
//!             if handle.write(line + "\n").await.is_err() {
//!                 break;
//!             }
//!         }
//!     });
//! };
//!
//! Server::new(SessionConfig::default(), echo)
//!     .run(transport, std::future::pending::<()>())
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod error;
pub mod handle;
pub mod registry;
pub mod server;
pub mod session;
pub mod timer;
pub mod transport;

// Re-export main types
pub use bridge::{RecordBridge, RecordReply, RECORD_DELIMITER};
pub use error::SessionError;
pub use handle::{Command, SessionHandle};
pub use registry::{SessionAcceptor, SessionRegistry};
pub use server::Server;
pub use session::{Outgoing, Session, SessionConfig, SessionState, SessionStats};
pub use timer::{
    SegmentKey, SegmentTimers, TimerEvent, TimerWheel, DEFAULT_RETRANSMIT_INTERVAL,
    DEFAULT_SESSION_EXPIRY,
};
pub use transport::{UdpTransport, RECV_BUFFER_SIZE};
