//! UDP transport for LRCP.
//!
//! One protocol message maps to exactly one datagram; nothing is coalesced
//! or split here.

use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

use lrcp_wire::MAX_MESSAGE_SIZE;

/// Receive buffer size. Anything this long or longer is invalid anyway, so
/// truncated datagrams are still rejected by the decoder.
pub const RECV_BUFFER_SIZE: usize = MAX_MESSAGE_SIZE + 24;

/// A bound UDP socket
#[derive(Debug)]
pub struct UdpTransport {
    local_addr: SocketAddr,
    inner: UdpSocket,
}

impl UdpTransport {
    /// Bind a new socket to `addr`.
    ///
    /// Passing port 0 lets the OS choose an ephemeral port.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(addr).await?;
        Self::from_socket(inner)
    }

    /// Wrap an already bound socket
    pub fn from_socket(inner: UdpSocket) -> io::Result<Self> {
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Address the socket is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Receive the next datagram into `buf`
    pub async fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }

    /// Send `bytes` as a single datagram to `dest`
    pub async fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> io::Result<()> {
        self.inner.send_to(bytes, dest).await?;
        Ok(())
    }
}
