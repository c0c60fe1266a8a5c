//! Per-session state machine.
//!
//! A [`Session`] owns everything about one logical connection: the peer
//! address captured when it was created, send/receive offsets, the
//! unacknowledged outbound segments with their timers, and the record bridge
//! feeding the application. It performs no I/O. Every handler appends the
//! datagrams it wants sent to an outbox owned by the caller.

use bytes::Bytes;
use lrcp_wire::{DataChunker, Message};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::bridge::{RecordBridge, RecordReply};
use crate::error::SessionError;
use crate::timer::{SegmentKey, SegmentTimers, TimerWheel, DEFAULT_RETRANSMIT_INTERVAL, DEFAULT_SESSION_EXPIRY};

/// Configuration for LRCP sessions
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Interval between retransmissions of an unacknowledged segment
    pub retransmit_interval: Duration,
    /// How long a segment may stay unacknowledged before the session is closed
    pub session_expiry: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retransmit_interval: DEFAULT_RETRANSMIT_INTERVAL,
            session_expiry: DEFAULT_SESSION_EXPIRY,
        }
    }
}

/// A datagram queued for sending
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    /// Destination address
    pub addr: SocketAddr,
    /// Encoded message
    pub bytes: Bytes,
}

/// Statistics for a session
#[derive(Clone, Debug, Default)]
pub struct SessionStats {
    /// Stream bytes accepted in order from the peer
    pub bytes_in: u64,
    /// Stream bytes queued by the application
    pub bytes_out: u64,
    /// Messages handled for this session
    pub frames_received: u64,
    /// Messages sent for this session, retransmissions included
    pub frames_sent: u64,
    /// DATA segments resent
    pub retransmissions: u64,
    /// DATA messages ignored as duplicate or out of order
    pub out_of_order: u64,
}

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Exchanging data
    Open,
    /// Terminal; the session is about to leave the registry
    Closed,
}

/// An unacknowledged outbound segment
#[derive(Debug)]
struct Segment {
    /// Stream offset just past the last byte
    end: u32,
    /// Encoded DATA message, resent verbatim
    frame: Bytes,
    timers: SegmentTimers,
}

/// One logical LRCP connection
#[derive(Debug)]
pub struct Session {
    id: u32,
    epoch: u64,
    peer: SocketAddr,
    state: SessionState,
    /// Total stream bytes queued for sending
    send_offset: u32,
    /// Highest cumulative ACK received
    max_acked: u32,
    /// Next expected inbound stream offset
    recv_offset: u32,
    outstanding: VecDeque<Segment>,
    bridge: RecordBridge,
    chunker: DataChunker,
    created_at: Instant,
    stats: SessionStats,
}

impl Session {
    /// Create an open session bound to `peer`
    pub fn new(id: u32, epoch: u64, peer: SocketAddr) -> Self {
        Self {
            id,
            epoch,
            peer,
            state: SessionState::Open,
            send_offset: 0,
            max_acked: 0,
            recv_offset: 0,
            outstanding: VecDeque::new(),
            bridge: RecordBridge::new(),
            chunker: DataChunker::new(),
            created_at: Instant::now(),
            stats: SessionStats::default(),
        }
    }

    /// Session ID
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Registry-unique creation counter
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Address every reply goes to
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session has been closed
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    /// Total stream bytes queued for sending
    pub fn send_offset(&self) -> u32 {
        self.send_offset
    }

    /// Highest cumulative ACK received
    pub fn max_acked(&self) -> u32 {
        self.max_acked
    }

    /// Next expected inbound stream offset
    pub fn recv_offset(&self) -> u32 {
        self.recv_offset
    }

    /// Number of unacknowledged segments
    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    /// Session statistics
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Time since the session was created
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn send(&mut self, msg: &Message, out: &mut Vec<Outgoing>) {
        // Chunking keeps every DATA under the ceiling and control messages are tiny
        let bytes = match msg.encode() {
            Ok(bytes) => bytes,
            Err(e) => panic!("session {}: cannot encode {}: {}", self.id, msg, e),
        };
        self.push_frame(bytes, out);
    }

    fn push_frame(&mut self, bytes: Bytes, out: &mut Vec<Outgoing>) {
        self.stats.frames_sent += 1;
        out.push(Outgoing {
            addr: self.peer,
            bytes,
        });
    }

    /// CONNECT for a live session: acknowledge again
    pub fn on_connect(&mut self, out: &mut Vec<Outgoing>) {
        self.stats.frames_received += 1;
        self.send(&Message::ack(self.id, 0), out);
    }

    /// DATA from the peer
    pub fn on_data(&mut self, position: u32, payload: &[u8], out: &mut Vec<Outgoing>) {
        self.stats.frames_received += 1;

        let next = u64::from(self.recv_offset) + payload.len() as u64;
        if position == self.recv_offset && next <= u64::from(lrcp_wire::MAX_NUMERIC) {
            self.recv_offset = next as u32;
            self.stats.bytes_in += payload.len() as u64;
            trace!(
                "Session {}: accepted {} bytes at {}, recv_offset={}",
                self.id,
                payload.len(),
                position,
                self.recv_offset
            );
            self.send(&Message::ack(self.id, self.recv_offset), out);
            self.bridge.push(payload);
        } else {
            self.stats.out_of_order += 1;
            debug!(
                "Session {}: DATA at {} while expecting {}, re-acking",
                self.id, position, self.recv_offset
            );
            self.send(&Message::ack(self.id, self.recv_offset), out);
        }
    }

    /// ACK from the peer
    pub fn on_ack(&mut self, length: u32, out: &mut Vec<Outgoing>) {
        self.stats.frames_received += 1;

        if length <= self.max_acked {
            trace!(
                "Session {}: stale ACK {} (max_acked={})",
                self.id,
                length,
                self.max_acked
            );
            return;
        }

        if length > self.send_offset {
            warn!(
                "Session {}: peer {} acknowledged {} bytes but only {} were sent, closing",
                self.id, self.peer, length, self.send_offset
            );
            self.close(out);
            return;
        }

        self.max_acked = length;
        while self.outstanding.front().map_or(false, |seg| seg.end <= length) {
            self.outstanding.pop_front();
        }

        if length == self.send_offset {
            debug!("Session {}: all {} bytes acknowledged", self.id, length);
            return;
        }

        debug!(
            "Session {}: partial ACK {} of {}, resending {} segments",
            self.id,
            length,
            self.send_offset,
            self.outstanding.len()
        );
        let frames: Vec<Bytes> = self.outstanding.iter().map(|seg| seg.frame.clone()).collect();
        for frame in frames {
            self.stats.retransmissions += 1;
            self.push_frame(frame, out);
        }
    }

    /// CLOSE from the peer
    pub fn on_close(&mut self, out: &mut Vec<Outgoing>) {
        self.stats.frames_received += 1;
        info!("Session {}: closed by peer {}", self.id, self.peer);
        self.close(out);
    }

    /// Queue application bytes for reliable delivery.
    ///
    /// The bytes are chunked, each chunk is sent at once as a DATA message and
    /// kept with its retransmit and expiry timers until acknowledged.
    pub fn write(
        &mut self,
        data: Bytes,
        timers: &TimerWheel,
        out: &mut Vec<Outgoing>,
    ) -> Result<(), SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }

        let messages = self.chunker.split(self.id, self.send_offset, data)?;
        for msg in messages {
            let Message::Data { payload, .. } = &msg else {
                unreachable!("chunker yields only DATA, got {}", msg)
            };
            let len = payload.len() as u32;
            let end = self.send_offset + len;
            let frame = match msg.encode() {
                Ok(frame) => frame,
                Err(e) => panic!("session {}: chunker produced unencodable {}: {}", self.id, msg, e),
            };

            self.push_frame(frame.clone(), out);
            self.send_offset = end;
            self.stats.bytes_out += u64::from(len);

            let key = SegmentKey {
                session: self.id,
                epoch: self.epoch,
                end,
            };
            self.outstanding.push_back(Segment {
                end,
                frame,
                timers: timers.arm_segment(key),
            });
        }

        trace!(
            "Session {}: send_offset={} outstanding={}",
            self.id,
            self.send_offset,
            self.outstanding.len()
        );
        Ok(())
    }

    /// Retransmit tick for the segment ending at `end`
    pub fn on_retransmit(&mut self, end: u32, out: &mut Vec<Outgoing>) {
        let Some(idx) = self.outstanding.iter().position(|seg| seg.end == end) else {
            return;
        };

        if end <= self.max_acked {
            // Acknowledged since the tick was scheduled
            if let Some(seg) = self.outstanding.remove(idx) {
                seg.timers.cancel();
            }
            return;
        }

        debug!("Session {}: retransmitting segment ending at {}", self.id, end);
        let frame = self.outstanding[idx].frame.clone();
        self.stats.retransmissions += 1;
        self.push_frame(frame, out);
    }

    /// Expiry for the segment ending at `end`
    pub fn on_expire(&mut self, end: u32, out: &mut Vec<Outgoing>) {
        let unacked = end > self.max_acked && self.outstanding.iter().any(|seg| seg.end == end);
        if unacked {
            info!(
                "Session {}: segment ending at {} unacknowledged for too long, closing",
                self.id, end
            );
            self.close(out);
        }
    }

    /// Park a pull request on the record bridge
    pub fn request_record(&mut self, reply: RecordReply) {
        self.bridge.request(reply);
    }

    /// Close the session: cancel every timer, end the record stream and send
    /// one CLOSE to the peer. Closing twice does nothing.
    pub fn close(&mut self, out: &mut Vec<Outgoing>) {
        if self.is_closed() {
            return;
        }
        self.state = SessionState::Closed;

        for seg in self.outstanding.drain(..) {
            seg.timers.cancel();
        }
        self.bridge.close();
        self.send(&Message::close(self.id), out);

        info!(
            "Session {} with {} closed after {:?}: in={}B out={}B acked={} frames_rx={} frames_tx={} retransmits={}",
            self.id,
            self.peer,
            self.age(),
            self.stats.bytes_in,
            self.stats.bytes_out,
            self.max_acked,
            self.stats.frames_received,
            self.stats.frames_sent,
            self.stats.retransmissions
        );
    }
}
