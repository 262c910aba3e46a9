//! Bounded per-subscriber event queue with a drop-newest policy
//!
//! Offering to a full queue never waits: the frame is discarded for that
//! subscriber only and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};

/// One rendered event, shared by every subscriber of a transport
pub type Frame = Arc<str>;

/// Result of offering a frame to a queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Frame queued
    Accepted,
    /// Queue full, frame discarded
    Dropped,
    /// Receiving side is gone
    Disconnected,
}

/// Producer half, held by the registry
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Frame>,
    dropped: Arc<AtomicU64>,
}

/// Consumer half, held by the viewer task
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<Frame>,
    dropped: Arc<AtomicU64>,
}

/// Create a queue holding at most `capacity` frames
///
/// # Panics
///
/// Panics if `capacity` is zero; configuration validation rejects that value.
#[must_use]
pub fn event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    let dropped = Arc::new(AtomicU64::new(0));
    (
        EventSender {
            tx,
            dropped: Arc::clone(&dropped),
        },
        EventReceiver { rx, dropped },
    )
}

impl EventSender {
    /// Offer a frame without waiting
    pub fn offer(&self, frame: Frame) -> Offer {
        match self.tx.try_send(frame) {
            Ok(()) => Offer::Accepted,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Offer::Dropped
            }
            Err(TrySendError::Closed(_)) => Offer::Disconnected,
        }
    }

    /// Whether the receiver has gone away
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl EventReceiver {
    /// Wait for the next frame; `None` once every sender is dropped
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Frames discarded because the queue was full
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
