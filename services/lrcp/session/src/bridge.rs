//! Record bridge between in-order stream bytes and the application.
//!
//! The session pushes bytes in as they are accepted; the application pulls
//! complete newline-terminated records out. At most one pull request is
//! outstanding at a time, and a waiting request is always served before
//! anything is queued, so the record queue and the pending slot are never
//! both occupied.

use bytes::BytesMut;
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tracing::trace;

/// Reply slot for one pull request. `None` means end-of-stream.
pub type RecordReply = oneshot::Sender<Option<String>>;

/// Record delimiter
pub const RECORD_DELIMITER: u8 = b'\n';

/// Push-to-pull record bridge for one session
#[derive(Debug, Default)]
pub struct RecordBridge {
    /// Bytes received after the last complete record
    partial: BytesMut,
    /// Complete records nobody has asked for yet
    records: VecDeque<String>,
    /// Waiting pull request
    pending: Option<RecordReply>,
    closed: bool,
}

impl RecordBridge {
    /// Create an empty bridge
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed in-order stream bytes and release every completed record
    pub fn push(&mut self, bytes: &[u8]) {
        if self.closed {
            return;
        }

        self.partial.extend_from_slice(bytes);
        while let Some(idx) = self.partial.iter().position(|&b| b == RECORD_DELIMITER) {
            let mut line = self.partial.split_to(idx + 1);
            line.truncate(idx);
            if line.last() == Some(&b'\r') {
                line.truncate(idx - 1);
            }
            self.deliver(String::from_utf8_lossy(&line).into_owned());
        }
    }

    fn deliver(&mut self, record: String) {
        match self.pending.take() {
            Some(reply) => {
                // A consumer that gave up waiting leaves the record for the next pull
                if let Err(Some(record)) = reply.send(Some(record)) {
                    trace!("Pending consumer dropped, queueing record");
                    self.records.push_back(record);
                }
            }
            None => self.records.push_back(record),
        }
    }

    /// Ask for the next record.
    ///
    /// Answered immediately when a record is queued or the bridge is closed,
    /// otherwise parked until the next record arrives or the bridge closes. A
    /// newer request replaces a parked one, which then sees end-of-stream.
    pub fn request(&mut self, reply: RecordReply) {
        if let Some(record) = self.records.pop_front() {
            let _ = reply.send(Some(record));
        } else if self.closed {
            let _ = reply.send(None);
        } else if let Some(previous) = self.pending.replace(reply) {
            let _ = previous.send(None);
        }
    }

    /// End the stream: resolve the waiting request and drop queued records
    pub fn close(&mut self) {
        self.closed = true;
        self.records.clear();
        self.partial.clear();
        if let Some(reply) = self.pending.take() {
            let _ = reply.send(None);
        }
    }

    /// Number of complete records waiting to be pulled
    pub fn queued(&self) -> usize {
        self.records.len()
    }

    /// Whether a pull request is parked
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Whether the bridge has been closed
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pull(bridge: &mut RecordBridge) -> oneshot::Receiver<Option<String>> {
        let (tx, rx) = oneshot::channel();
        bridge.request(tx);
        rx
    }

    #[tokio::test]
    async fn test_records_queue_until_pulled() {
        let mut bridge = RecordBridge::new();
        bridge.push(b"hello\nworld\n");
        assert_eq!(bridge.queued(), 2);

        assert_eq!(pull(&mut bridge).await.unwrap(), Some("hello".to_string()));
        assert_eq!(pull(&mut bridge).await.unwrap(), Some("world".to_string()));
        assert_eq!(bridge.queued(), 0);
    }

    #[tokio::test]
    async fn test_pending_pull_is_served_first() {
        let mut bridge = RecordBridge::new();
        let rx = pull(&mut bridge);
        assert!(bridge.has_pending());

        bridge.push(b"first\nsecond\n");
        assert!(!bridge.has_pending());
        assert_eq!(bridge.queued(), 1);
        assert_eq!(rx.await.unwrap(), Some("first".to_string()));
    }

    #[tokio::test]
    async fn test_partial_records_are_joined() {
        let mut bridge = RecordBridge::new();
        bridge.push(b"hel");
        bridge.push(b"");
        bridge.push(b"lo wor");
        assert_eq!(bridge.queued(), 0);
        bridge.push(b"ld\nrest");
        assert_eq!(pull(&mut bridge).await.unwrap(), Some("hello world".to_string()));
        assert_eq!(bridge.queued(), 0);
    }

    #[tokio::test]
    async fn test_carriage_return_is_stripped() {
        let mut bridge = RecordBridge::new();
        bridge.push(b"dos\r\n\r\nkeep\rme\n");
        assert_eq!(pull(&mut bridge).await.unwrap(), Some("dos".to_string()));
        assert_eq!(pull(&mut bridge).await.unwrap(), Some(String::new()));
        assert_eq!(pull(&mut bridge).await.unwrap(), Some("keep\rme".to_string()));
    }

    #[tokio::test]
    async fn test_close_resolves_pending_with_end_of_stream() {
        let mut bridge = RecordBridge::new();
        let rx = pull(&mut bridge);
        bridge.close();
        assert_eq!(rx.await.unwrap(), None);
        assert_eq!(pull(&mut bridge).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_discards_queue_and_later_pushes() {
        let mut bridge = RecordBridge::new();
        bridge.push(b"one\ntwo\n");
        bridge.close();
        bridge.push(b"three\n");
        assert_eq!(bridge.queued(), 0);
        assert!(bridge.is_closed());
        assert_eq!(pull(&mut bridge).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_newer_request_replaces_pending() {
        let mut bridge = RecordBridge::new();
        let first = pull(&mut bridge);
        let second = pull(&mut bridge);
        assert_eq!(first.await.unwrap(), None);

        bridge.push(b"x\n");
        assert_eq!(second.await.unwrap(), Some("x".to_string()));
    }

    #[tokio::test]
    async fn test_dropped_consumer_keeps_record() {
        let mut bridge = RecordBridge::new();
        drop(pull(&mut bridge));
        bridge.push(b"kept\n");
        assert_eq!(bridge.queued(), 1);
        assert_eq!(pull(&mut bridge).await.unwrap(), Some("kept".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let mut bridge = RecordBridge::new();
        bridge.push(&[b'a', 0xff, b'b', b'\n']);
        assert_eq!(pull(&mut bridge).await.unwrap(), Some("a\u{fffd}b".to_string()));
    }
}
