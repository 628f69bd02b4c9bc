//! # EventStream: the consumer side of a monitor subscription.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use super::event::ConnectionEvent;

/// In-order, bounded stream of connection events.
///
/// Ends (`None`) once the producer side is closed and buffered events are
/// drained. It never restarts; subscribe again for a new stream.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<Arc<ConnectionEvent>>,
}

impl EventStream {
    /// Bounded channel whose receiving half is an `EventStream`.
    ///
    /// Adapters for remote peers use the sender to feed decoded events.
    pub fn channel(capacity: usize) -> (mpsc::Sender<Arc<ConnectionEvent>>, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (tx, Self { rx })
    }

    /// Waits for the next event; `None` once the stream is closed.
    pub async fn recv(&mut self) -> Option<Arc<ConnectionEvent>> {
        self.rx.recv().await
    }

    /// Returns an already-buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<ConnectionEvent>> {
        self.rx.try_recv().ok()
    }

    /// True once the producer side is gone and nothing is buffered.
    pub fn is_terminated(&self) -> bool {
        self.rx.is_closed() && self.rx.is_empty()
    }
}

impl Stream for EventStream {
    type Item = Arc<ConnectionEvent>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
