//! Change notifier: fans table events out to subscribers.
//!
//! Backed by a bounded `tokio::sync::broadcast` channel. Publishing never
//! waits; a subscriber that falls more than `capacity` events behind loses
//! the oldest ones and is told how many it missed.

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::warn;

use sbs_core::table::{TrackEvent, TrackSink};

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<TrackEvent>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Notifier { tx }
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription {
            rx: self.tx.subscribe(),
            missed: 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Notifier::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl TrackSink for Notifier {
    fn publish(&self, event: TrackEvent) {
        // Err only means nobody is subscribed right now.
        let _ = self.tx.send(event);
    }
}

/// One subscriber's view of the event stream, in mutation order.
#[derive(Debug)]
pub struct Subscription {
    rx: broadcast::Receiver<TrackEvent>,
    missed: u64,
}

impl Subscription {
    /// Next event, or `None` once the notifier is gone.
    pub async fn recv(&mut self) -> Option<TrackEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(n)) => self.note_lag(n),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-queued event without waiting.
    pub fn try_recv(&mut self) -> Option<TrackEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(n)) => self.note_lag(n),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Total events dropped because this subscriber was too slow. A
    /// subscriber that missed events should re-read a snapshot.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    fn note_lag(&mut self, n: u64) {
        warn!("track subscriber lagged, {n} events dropped");
        self.missed += n;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
