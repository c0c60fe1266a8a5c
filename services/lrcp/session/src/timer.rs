//! Retransmission and expiry timers.
//!
//! Each outbound segment gets two timers: a periodic retransmit tick and a
//! one-shot expiry. Timers never touch session state. They run as small tokio
//! tasks that post a [`TimerEvent`] back into the server loop, where the event
//! is checked against the current session (epoch and acknowledged offset)
//! before anything happens. Cancelling aborts the tasks; an event that was
//! already posted is discarded by that check.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

/// Default retransmission period
pub const DEFAULT_RETRANSMIT_INTERVAL: Duration = Duration::from_millis(3000);
/// Default time a segment may stay unacknowledged before its session is dropped
pub const DEFAULT_SESSION_EXPIRY: Duration = Duration::from_millis(60_000);

/// Identifies the segment a timer belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentKey {
    /// Session ID
    pub session: u32,
    /// Session epoch, distinguishes reuses of the same ID
    pub epoch: u64,
    /// Stream offset just past the segment's last byte
    pub end: u32,
}

/// Timer firing delivered to the server loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Periodic retransmission tick
    Retransmit(SegmentKey),
    /// One-shot expiry
    Expire(SegmentKey),
}

impl TimerEvent {
    /// Segment the event refers to
    pub fn key(&self) -> SegmentKey {
        match *self {
            TimerEvent::Retransmit(key) | TimerEvent::Expire(key) => key,
        }
    }
}

/// Spawns segment timers that report into one channel
#[derive(Debug, Clone)]
pub struct TimerWheel {
    tx: mpsc::UnboundedSender<TimerEvent>,
    retransmit_interval: Duration,
    expiry: Duration,
}

impl TimerWheel {
    /// Create a wheel that posts events to `tx`
    pub fn new(
        tx: mpsc::UnboundedSender<TimerEvent>,
        retransmit_interval: Duration,
        expiry: Duration,
    ) -> Self {
        Self {
            tx,
            retransmit_interval,
            expiry,
        }
    }

    /// Create a wheel together with the receiving end of its event channel
    pub fn channel(
        retransmit_interval: Duration,
        expiry: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<TimerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx, retransmit_interval, expiry), rx)
    }

    /// Retransmission period
    pub fn retransmit_interval(&self) -> Duration {
        self.retransmit_interval
    }

    /// Expiry window
    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Arm both timers for a freshly sent segment.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm_segment(&self, key: SegmentKey) -> SegmentTimers {
        let period = self.retransmit_interval;
        let tx = self.tx.clone();
        let retransmit = tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                if tx.send(TimerEvent::Retransmit(key)).is_err() {
                    break;
                }
            }
        });

        let expiry = self.expiry;
        let tx = self.tx.clone();
        let expire = tokio::spawn(async move {
            sleep(expiry).await;
            let _ = tx.send(TimerEvent::Expire(key));
        });

        SegmentTimers {
            retransmit: retransmit.abort_handle(),
            expire: expire.abort_handle(),
        }
    }
}

/// Handles to one segment's timers. Dropping the handles cancels the timers.
#[derive(Debug)]
pub struct SegmentTimers {
    retransmit: AbortHandle,
    expire: AbortHandle,
}

impl SegmentTimers {
    /// Stop both timers
    pub fn cancel(&self) {
        self.retransmit.abort();
        self.expire.abort();
    }
}

impl Drop for SegmentTimers {
    fn drop(&mut self) {
        self.cancel();
    }
}
