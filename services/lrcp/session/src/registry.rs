//! Session registry and datagram dispatcher.
//!
//! The [`SessionRegistry`] owns every live [`Session`], keyed by session ID.
//! The server loop feeds it three kinds of events (inbound datagrams, timer
//! firings, application commands), one at a time, and drains the outbox
//! afterwards. Sessions are removed from the map as soon as they close.

use bytes::Bytes;
use lrcp_wire::Message;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::error::SessionError;
use crate::handle::{Command, SessionHandle};
use crate::session::{Outgoing, Session};
use crate::timer::{TimerEvent, TimerWheel};

/// Receives a handle for every newly accepted session
pub trait SessionAcceptor: Send + Sync {
    /// Called once per new session, before its first ACK is sent
    fn on_session(&self, handle: SessionHandle);
}

impl<F> SessionAcceptor for F
where
    F: Fn(SessionHandle) + Send + Sync,
{
    fn on_session(&self, handle: SessionHandle) {
        self(handle)
    }
}

/// Registry of live sessions and dispatcher for their events
pub struct SessionRegistry {
    sessions: HashMap<u32, Session>,
    next_epoch: u64,
    timers: TimerWheel,
    commands: mpsc::UnboundedSender<Command>,
    acceptor: Arc<dyn SessionAcceptor>,
    outbox: Vec<Outgoing>,
}

impl SessionRegistry {
    /// Create an empty registry.
    ///
    /// `commands` is the sender half handed out inside every
    /// [`SessionHandle`]; its receiver must be fed back into
    /// [`SessionRegistry::handle_command`].
    pub fn new(
        timers: TimerWheel,
        commands: mpsc::UnboundedSender<Command>,
        acceptor: Arc<dyn SessionAcceptor>,
    ) -> Self {
        Self {
            sessions: HashMap::new(),
            next_epoch: 1,
            timers,
            commands,
            acceptor,
            outbox: Vec::new(),
        }
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is live
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Look up a live session
    pub fn get(&self, id: u32) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// Take every datagram queued since the last call
    pub fn drain_outbox(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    /// Handle one inbound datagram from `from`
    pub fn handle_datagram(&mut self, buf: &[u8], from: SocketAddr) {
        let msg = match Message::decode(buf) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(
                    "Dropping invalid datagram from {} ({} bytes): {}",
                    from,
                    buf.len(),
                    e
                );
                return;
            }
        };
        trace!("Received {} from {}", msg, from);

        let id = msg.session();
        if let Message::Connect { .. } = msg {
            if !self.sessions.contains_key(&id) {
                self.open(id, from);
            }
        }

        let Some(session) = self.sessions.get_mut(&id) else {
            debug!("{} from {} for unknown session, replying close", msg.typ(), from);
            self.reply_close(id, from);
            return;
        };

        match msg {
            Message::Connect { .. } => session.on_connect(&mut self.outbox),
            Message::Data {
                position, payload, ..
            } => session.on_data(position, &payload, &mut self.outbox),
            Message::Ack { length, .. } => session.on_ack(length, &mut self.outbox),
            Message::Close { .. } => session.on_close(&mut self.outbox),
        }
        self.reap(id);
    }

    /// Handle a timer firing
    pub fn handle_timer(&mut self, event: TimerEvent) {
        let key = event.key();
        let Some(session) = self
            .sessions
            .get_mut(&key.session)
            .filter(|s| s.epoch() == key.epoch)
        else {
            trace!("Ignoring {:?} for a session that is gone", event);
            return;
        };

        match event {
            TimerEvent::Retransmit(key) => session.on_retransmit(key.end, &mut self.outbox),
            TimerEvent::Expire(key) => session.on_expire(key.end, &mut self.outbox),
        }
        self.reap(key.session);
    }

    /// Handle a request from an application handle
    pub fn handle_command(&mut self, command: Command) {
        match command {
            Command::Write {
                session,
                epoch,
                data,
                reply,
            } => {
                let result = match live(&mut self.sessions, session, epoch) {
                    Some(s) => s.write(data, &self.timers, &mut self.outbox),
                    None => Err(SessionError::Closed),
                };
                let _ = reply.send(result);
            }
            Command::NextRecord {
                session,
                epoch,
                reply,
            } => match live(&mut self.sessions, session, epoch) {
                Some(s) => s.request_record(reply),
                None => {
                    let _ = reply.send(None);
                }
            },
            Command::Close { session, epoch } => {
                if let Some(s) = live(&mut self.sessions, session, epoch) {
                    info!("Session {}: closed by application", session);
                    s.close(&mut self.outbox);
                    self.reap(session);
                }
            }
        }
    }

    /// Close every live session, sending CLOSE to each peer
    pub fn close_all(&mut self) {
        for (_, mut session) in self.sessions.drain() {
            session.close(&mut self.outbox);
        }
    }

    fn open(&mut self, id: u32, peer: SocketAddr) {
        let epoch = self.next_epoch;
        self.next_epoch += 1;

        info!("Session {}: opened by {}", id, peer);
        self.sessions.insert(id, Session::new(id, epoch, peer));
        self.acceptor
            .on_session(SessionHandle::new(id, epoch, peer, self.commands.clone()));
    }

    fn reap(&mut self, id: u32) {
        if self.sessions.get(&id).map_or(false, Session::is_closed) {
            self.sessions.remove(&id);
            debug!("Session {}: removed, {} live", id, self.sessions.len());
        }
    }

    fn reply_close(&mut self, id: u32, to: SocketAddr) {
        let bytes: Bytes = match Message::close(id).encode() {
            Ok(bytes) => bytes,
            Err(e) => panic!("cannot encode close({}): {}", id, e),
        };
        self.outbox.push(Outgoing { addr: to, bytes });
    }
}

/// Session `id`, if it is still the incarnation `epoch` refers to
fn live(sessions: &mut HashMap<u32, Session>, id: u32, epoch: u64) -> Option<&mut Session> {
    sessions.get_mut(&id).filter(|s| s.epoch() == epoch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionConfig;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    struct Harness {
        registry: SessionRegistry,
        timer_rx: mpsc::UnboundedReceiver<TimerEvent>,
        command_rx: mpsc::UnboundedReceiver<Command>,
        accepted: Arc<Mutex<Vec<SessionHandle>>>,
    }

    impl Harness {
        fn new() -> Self {
            let config = SessionConfig::default();
            let (timers, timer_rx) =
                TimerWheel::channel(config.retransmit_interval, config.session_expiry);
            let (commands, command_rx) = mpsc::unbounded_channel();
            let accepted = Arc::new(Mutex::new(Vec::new()));
            let sink = accepted.clone();
            let acceptor = move |handle: SessionHandle| sink.lock().unwrap().push(handle);
            Self {
                registry: SessionRegistry::new(timers, commands, Arc::new(acceptor)),
                timer_rx,
                command_rx,
                accepted,
            }
        }

        fn send(&mut self, datagram: &str) -> Vec<String> {
            self.registry.handle_datagram(datagram.as_bytes(), peer());
            self.outbox()
        }

        fn outbox(&mut self) -> Vec<String> {
            self.registry
                .drain_outbox()
                .into_iter()
                .map(|o| String::from_utf8(o.bytes.to_vec()).unwrap())
                .collect()
        }

        fn take_handle(&self) -> SessionHandle {
            self.accepted.lock().unwrap().remove(0)
        }

        /// Process commands until `fut` resolves
        async fn drive<T>(&mut self, fut: impl std::future::Future<Output = T>) -> T {
            tokio::pin!(fut);
            loop {
                tokio::select! {
                    out = &mut fut => return out,
                    Some(cmd) = self.command_rx.recv() => self.registry.handle_command(cmd),
                }
            }
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[tokio::test]
    async fn test_connect_data_write_scenario() {
        let mut h = Harness::new();
        assert_eq!(h.send("/connect/1/"), vec!["/ack/1/0/"]);
        let mut handle = h.take_handle();
        assert_eq!(handle.id(), 1);
        assert_eq!(handle.peer(), peer());

        assert_eq!(h.send("/data/1/0/hello\n/"), vec!["/ack/1/6/"]);
        let record = h.drive(handle.next_record()).await;
        assert_eq!(record, Some("hello".to_string()));

        let reversed: String = record.unwrap().chars().rev().collect();
        h.drive(handle.write(reversed + "\n")).await.unwrap();
        assert_eq!(h.outbox(), vec!["/data/1/0/olleh\n/"]);

        assert!(h.send("/ack/1/6/").is_empty());
        assert_eq!(h.registry.get(1).unwrap().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let mut h = Harness::new();
        assert_eq!(h.send("/connect/1/"), vec!["/ack/1/0/"]);
        assert_eq!(h.send("/connect/1/"), vec!["/ack/1/0/"]);
        assert_eq!(h.registry.len(), 1);
        assert_eq!(h.accepted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_datagrams_are_dropped_silently() {
        let mut h = Harness::new();
        for bad in ["", "/connect/", "/data/1/0/a/b/", "hello", "/connect/-3/"] {
            assert!(h.send(bad).is_empty(), "reply to {:?}", bad);
        }
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_session_gets_close() {
        let mut h = Harness::new();
        assert_eq!(h.send("/data/9/0/hi\n/"), vec!["/close/9/"]);
        assert_eq!(h.send("/ack/9/0/"), vec!["/close/9/"]);
        assert_eq!(h.send("/close/9/"), vec!["/close/9/"]);
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_session_close_goes_to_sender() {
        let mut h = Harness::new();
        let stranger: SocketAddr = "10.0.0.9:5555".parse().unwrap();
        h.registry.handle_datagram(b"/ack/3/1/", stranger);
        let out = h.registry.drain_outbox();
        assert_eq!(out[0].addr, stranger);
    }

    #[tokio::test]
    async fn test_close_then_data_replies_close() {
        let mut h = Harness::new();
        h.send("/connect/1/");
        let mut handle = h.take_handle();
        h.drive(handle.write("pending\n")).await.unwrap();
        h.outbox();

        assert_eq!(h.send("/close/1/"), vec!["/close/1/"]);
        assert!(h.registry.get(1).is_none());
        assert_eq!(h.send("/data/1/0/x/"), vec!["/close/1/"]);
        assert_eq!(h.drive(handle.next_record()).await, None);
        assert_eq!(
            h.drive(handle.write("more\n")).await,
            Err(SessionError::Closed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_timers() {
        let mut h = Harness::new();
        h.send("/connect/1/");
        let handle = h.take_handle();
        h.drive(handle.write("a\n")).await.unwrap();
        h.drive(handle.write("b\n")).await.unwrap();
        h.outbox();

        h.send("/close/1/");
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(h.timer_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_misbehaving_ack_closes_session() {
        let mut h = Harness::new();
        h.send("/connect/1/");
        let handle = h.take_handle();
        h.drive(handle.write("hi\n")).await.unwrap();
        h.outbox();

        assert_eq!(h.send("/ack/1/999/"), vec!["/close/1/"]);
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_id_reuse_after_close_creates_new_session() {
        let mut h = Harness::new();
        h.send("/connect/1/");
        let old = h.take_handle();
        h.send("/close/1/");

        assert_eq!(h.send("/connect/1/"), vec!["/ack/1/0/"]);
        let new = h.take_handle();
        assert_eq!(h.drive(old.write("stale\n")).await, Err(SessionError::Closed));
        h.drive(new.write("fresh\n")).await.unwrap();
        assert_eq!(h.outbox(), vec!["/data/1/0/fresh\n/"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retransmit_until_ack() {
        let mut h = Harness::new();
        h.send("/connect/1/");
        let handle = h.take_handle();
        let start = Instant::now();
        h.drive(handle.write("hello")).await.unwrap();
        assert_eq!(h.outbox(), vec!["/data/1/0/hello/"]);

        for n in 1..=2u32 {
            let event = h.timer_rx.recv().await.unwrap();
            assert_eq!(start.elapsed(), Duration::from_millis(3000) * n);
            h.registry.handle_timer(event);
            assert_eq!(h.outbox(), vec!["/data/1/0/hello/"]);
        }

        assert!(h.send("/ack/1/5/").is_empty());
        tokio::time::sleep(Duration::from_secs(120)).await;
        while let Ok(event) = h.timer_rx.try_recv() {
            h.registry.handle_timer(event);
        }
        assert!(h.outbox().is_empty());
        assert_eq!(h.registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_closes_session() {
        let mut h = Harness::new();
        h.send("/connect/1/");
        let mut handle = h.take_handle();
        let start = Instant::now();
        h.drive(handle.write("hello")).await.unwrap();
        h.outbox();

        let mut resends = 0;
        loop {
            let event = h.timer_rx.recv().await.unwrap();
            h.registry.handle_timer(event);
            let out = h.outbox();
            if let TimerEvent::Expire(_) = event {
                assert_eq!(out, vec!["/close/1/"]);
                break;
            }
            assert_eq!(out, vec!["/data/1/0/hello/"]);
            resends += 1;
        }

        assert_eq!(start.elapsed(), Duration::from_millis(60_000));
        // the tick due at 60s may land on either side of the expiry
        assert!((19..=20).contains(&resends), "resent {} times", resends);
        assert!(h.registry.is_empty());
        assert_eq!(h.drive(handle.next_record()).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_event_after_reuse_is_ignored() {
        let mut h = Harness::new();
        h.send("/connect/1/");
        let old = h.take_handle();
        h.drive(old.write("x")).await.unwrap();
        h.outbox();
        let stale = TimerEvent::Expire(crate::timer::SegmentKey {
            session: 1,
            epoch: 1,
            end: 1,
        });

        h.send("/close/1/");
        h.send("/connect/1/");
        let new = h.take_handle();
        h.drive(new.write("y")).await.unwrap();
        h.outbox();

        h.registry.handle_timer(stale);
        assert!(h.outbox().is_empty());
        assert_eq!(h.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_application_close() {
        let mut h = Harness::new();
        h.send("/connect/5/");
        let handle = h.take_handle();
        handle.close();
        let cmd = h.command_rx.recv().await.unwrap();
        h.registry.handle_command(cmd);
        assert_eq!(h.outbox(), vec!["/close/5/"]);
        assert!(h.registry.is_empty());
    }

    #[tokio::test]
    async fn test_close_all() {
        let mut h = Harness::new();
        h.send("/connect/1/");
        h.send("/connect/2/");
        h.registry.close_all();
        let mut out = h.outbox();
        out.sort();
        assert_eq!(out, vec!["/close/1/", "/close/2/"]);
        assert!(h.registry.is_empty());
    }
}
