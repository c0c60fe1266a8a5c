//! LRCP server loop.
//!
//! Everything that mutates session state happens here, on one task: inbound
//! datagrams, timer firings and application commands are taken one at a time
//! and handed to the [`SessionRegistry`]; whatever the registry queued is
//! sent before the next event is taken.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::registry::{SessionAcceptor, SessionRegistry};
use crate::session::SessionConfig;
use crate::timer::TimerWheel;
use crate::transport::{UdpTransport, RECV_BUFFER_SIZE};

/// LRCP server
pub struct Server {
    config: SessionConfig,
    acceptor: Arc<dyn SessionAcceptor>,
}

impl Server {
    /// Create a server that hands every new session to `acceptor`
    pub fn new<A>(config: SessionConfig, acceptor: A) -> Self
    where
        A: SessionAcceptor + 'static,
    {
        Self {
            config,
            acceptor: Arc::new(acceptor),
        }
    }

    /// Serve on `transport` until `shutdown` resolves.
    ///
    /// On shutdown every live session is closed and its peer told so.
    pub async fn run<F>(self, transport: UdpTransport, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        let (timers, mut timer_rx) =
            TimerWheel::channel(self.config.retransmit_interval, self.config.session_expiry);
        let (command_tx, mut command_rx) = mpsc::unbounded_channel();
        let mut registry = SessionRegistry::new(timers, command_tx, self.acceptor);

        info!(
            "LRCP server listening on {} (retransmit={:?}, expiry={:?})",
            transport.local_addr(),
            self.config.retransmit_interval,
            self.config.session_expiry
        );

        tokio::pin!(shutdown);
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutting down, closing {} sessions", registry.len());
                    registry.close_all();
                    flush(&transport, &mut registry).await;
                    break;
                }

                received = transport.recv_from(&mut buf) => {
                    match received {
                        Ok((len, from)) => registry.handle_datagram(&buf[..len], from),
                        // ICMP errors from earlier sends surface here on some platforms
                        Err(e) => warn!("Failed to receive datagram: {}", e),
                    }
                }

                Some(event) = timer_rx.recv() => registry.handle_timer(event),

                Some(command) = command_rx.recv() => registry.handle_command(command),
            }

            flush(&transport, &mut registry).await;
        }

        Ok(())
    }
}

async fn flush(transport: &UdpTransport, registry: &mut SessionRegistry) {
    for out in registry.drain_outbox() {
        match transport.send_to(&out.bytes, out.addr).await {
            Ok(()) => debug!("Sent {} bytes to {}", out.bytes.len(), out.addr),
            Err(e) => error!("Failed to send datagram to {}: {}", out.addr, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::SessionHandle;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::UdpSocket;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    fn reverser(mut handle: SessionHandle) {
        tokio::spawn(async move {
            while let Some(line) = handle.next_record().await {
                let reversed: String = line.chars().rev().collect();
                if handle.write(reversed + "\n").await.is_err() {
                    break;
                }
            }
        });
    }

    async fn start() -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
        let transport = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = transport.local_addr();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = Server::new(SessionConfig::default(), reverser);
        let task = tokio::spawn(async move {
            server
                .run(transport, async move {
                    let _ = stop_rx.await;
                })
                .await
                .unwrap();
        });
        (addr, stop_tx, task)
    }

    async fn exchange(client: &UdpSocket, server: SocketAddr, msg: &str) {
        client.send_to(msg.as_bytes(), server).await.unwrap();
    }

    async fn recv(client: &UdpSocket) -> String {
        let mut buf = [0u8; 1024];
        let (len, _) = timeout(Duration::from_secs(5), client.recv_from(&mut buf))
            .await
            .expect("timed out waiting for datagram")
            .unwrap();
        String::from_utf8(buf[..len].to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_line_reversal_over_udp() {
        let (server, stop, task) = start().await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        exchange(&client, server, "/connect/12345/").await;
        assert_eq!(recv(&client).await, "/ack/12345/0/");

        exchange(&client, server, "/data/12345/0/hello\n/").await;
        assert_eq!(recv(&client).await, "/ack/12345/6/");
        assert_eq!(recv(&client).await, "/data/12345/0/olleh\n/");
        exchange(&client, server, "/ack/12345/6/").await;

        exchange(&client, server, "/data/12345/6/Hello, world!\n/").await;
        assert_eq!(recv(&client).await, "/ack/12345/20/");
        assert_eq!(recv(&client).await, "/data/12345/6/!dlrow ,olleH\n/");
        exchange(&client, server, "/ack/12345/20/").await;

        exchange(&client, server, "/close/12345/").await;
        assert_eq!(recv(&client).await, "/close/12345/");

        stop.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_garbage_is_ignored_and_unknown_session_closed() {
        let (server, stop, task) = start().await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        exchange(&client, server, "this is not lrcp").await;
        exchange(&client, server, "/data/7/0/x/").await;
        assert_eq!(recv(&client).await, "/close/7/");

        stop.send(()).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_live_sessions() {
        let (server, stop, task) = start().await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        exchange(&client, server, "/connect/3/").await;
        assert_eq!(recv(&client).await, "/ack/3/0/");

        stop.send(()).unwrap();
        assert_eq!(recv(&client).await, "/close/3/");
        task.await.unwrap();
    }
}
