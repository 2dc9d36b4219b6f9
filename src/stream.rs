//! Suspending-iterator view of the event stream.
//!
//! Events are fanned out over a bounded broadcast channel. A consumer that
//! falls behind loses the oldest events, which are counted rather than
//! blocking the pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::events::SessionEvent;

/// Publishing side of the event stream, held by the watcher.
#[derive(Debug, Clone)]
pub struct EventStreamSender {
    sender: broadcast::Sender<SessionEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventStreamSender {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Publish an event to all open streams. A no-op without subscribers.
    pub fn publish(&self, event: &SessionEvent) {
        if self.sender.receiver_count() > 0 {
            let _ = self.sender.send(event.clone());
        }
    }

    /// Open a new stream positioned at the current end of the event flow.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            receiver: self.sender.subscribe(),
            dropped: self.dropped.clone(),
        }
    }

    /// Total events dropped across all streams due to overflow.
    #[must_use]
    pub fn events_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A suspending iterator over session events.
pub struct EventStream {
    receiver: broadcast::Receiver<SessionEvent>,
    dropped: Arc<AtomicU64>,
}

impl EventStream {
    /// Wait for the next event.
    ///
    /// Returns `None` once the watcher has shut down and the buffer is
    /// drained. When the bounded buffer overflows, the oldest events are
    /// discarded, counted, and the stream continues with the next
    /// available event.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.dropped.fetch_add(skipped, Ordering::Relaxed);
                    tracing::warn!(skipped, "Event stream lagged, oldest events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Receive without waiting; `None` when no event is ready.
    pub fn try_next(&mut self) -> Option<SessionEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    self.dropped.fetch_add(skipped, Ordering::Relaxed);
                }
                Err(_) => return None,
            }
        }
    }
}
