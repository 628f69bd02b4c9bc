//! # MonitorFanout: one upstream event source, many subscriber streams.
//!
//! [`MonitorFanout`] reads connection events from a single upstream source and
//! copies each one into every live subscriber's bounded queue.
//!
//! ## Architecture
//! ```text
//!  upstream ──► delivery loop ──submit(deliver E)──┐
//!                                                  ▼
//!  subscribe(token) ──submit(register S)──► SerialExecutor ──► subscribers: [S1, S2, S3]
//!  token.cancelled() ──submit(remove S)────┘                      │    │    │
//!                                                                 ▼    ▼    ▼
//!                                                             [100] [100] [100]  (bounded queues)
//! ```
//!
//! ## Rules
//! - Registration, removal and delivery are jobs on one [`SerialExecutor`], so
//!   they happen in a single total order. The subscriber list is touched
//!   from nowhere else.
//! - Every subscriber live when delivery of `E` starts receives `E` before any
//!   later event. A subscriber registered concurrently with `E` may or may
//!   not see it.
//! - Delivery **awaits** each queue. One full queue stalls delivery to all
//!   subscribers until it drains; a dropped [`EventStream`] is skipped.
//! - Removal drops the queue's only sender inside the executor, so no event
//!   can follow the close.
//! - When the upstream ends, subscribers are left open and simply go quiet.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::chain::MonitorConnection;
use crate::core::SerialExecutor;
use crate::error::ChainError;

use super::event::{ConnectionEvent, MonitorScope};
use super::stream::EventStream;

/// Pending events a subscriber queue holds before delivery blocks.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// A registered subscriber queue.
struct Subscription {
    id: u64,
    tx: mpsc::Sender<Arc<ConnectionEvent>>,
}

/// Fan-out of one upstream event source to many subscribers.
///
/// Cloning yields another handle to the same broadcaster.
#[derive(Clone)]
pub struct MonitorFanout {
    executor: SerialExecutor,
    /// Only ever locked from inside executor jobs.
    subscribers: Arc<Mutex<Vec<Subscription>>>,
    capacity: usize,
    next_id: Arc<AtomicU64>,
}

impl MonitorFanout {
    /// Fans out events received on `upstream`.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(upstream: mpsc::Receiver<ConnectionEvent>) -> Self {
        Self::from_stream(ReceiverStream::new(upstream))
    }

    /// Fans out any stream of events.
    pub fn from_stream<S>(upstream: S) -> Self
    where
        S: Stream<Item = ConnectionEvent> + Send + 'static,
    {
        Self::with_capacity(upstream, DEFAULT_QUEUE_CAPACITY)
    }

    /// Fans out `upstream` with a custom per-subscriber queue capacity (min 1).
    pub fn with_capacity<S>(upstream: S, capacity: usize) -> Self
    where
        S: Stream<Item = ConnectionEvent> + Send + 'static,
    {
        let fanout = Self {
            executor: SerialExecutor::new(),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            capacity: capacity.max(1),
            next_id: Arc::new(AtomicU64::new(0)),
        };
        fanout.spawn_delivery_loop(upstream);
        fanout
    }

    /// Registers a subscriber that lives until `cancel` fires.
    ///
    /// Returns immediately; registration is ordered through the executor. The
    /// stream ends after `cancel` fires and the removal job has run. Dropping
    /// the stream without cancelling keeps the registration until `cancel`.
    pub fn subscribe(&self, cancel: CancellationToken) -> EventStream {
        let (tx, stream) = EventStream::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let subscribers = Arc::clone(&self.subscribers);
        let executor = self.executor.clone();
        self.executor.submit(async move {
            subscribers.lock().await.push(Subscription { id, tx });
            tracing::trace!(subscriber = id, "monitor subscriber registered");

            tokio::spawn(async move {
                cancel.cancelled().await;
                executor.submit(async move {
                    // Dropping the sender here closes the queue.
                    subscribers.lock().await.retain(|s| s.id != id);
                    tracing::trace!(subscriber = id, "monitor subscriber removed");
                });
            });
        });

        stream
    }

    /// Number of live subscribers, as seen after every job submitted before this call.
    pub async fn subscriber_count(&self) -> usize {
        let (tx, rx) = oneshot::channel();
        let subscribers = Arc::clone(&self.subscribers);
        self.executor.submit(async move {
            let _ = tx.send(subscribers.lock().await.len());
        });
        rx.await.unwrap_or(0)
    }

    fn spawn_delivery_loop<S>(&self, upstream: S)
    where
        S: Stream<Item = ConnectionEvent> + Send + 'static,
    {
        let executor = self.executor.clone();
        let subscribers = Arc::clone(&self.subscribers);

        tokio::spawn(async move {
            let mut upstream = std::pin::pin!(upstream);
            while let Some(event) = upstream.next().await {
                let event = Arc::new(event);
                let subscribers = Arc::clone(&subscribers);
                executor.submit(async move {
                    deliver(&subscribers, event).await;
                });
            }
            tracing::debug!("monitor fanout upstream exhausted");
        });
    }
}

/// Pushes `event` into every registered queue, waiting on full ones.
async fn deliver(subscribers: &Mutex<Vec<Subscription>>, event: Arc<ConnectionEvent>) {
    let subscribers = subscribers.lock().await;
    for sub in subscribers.iter() {
        if sub.tx.send(Arc::clone(&event)).await.is_err() {
            tracing::trace!(subscriber = sub.id, seq = event.seq, "subscriber stream dropped; skipped");
        }
    }
}

#[async_trait]
impl MonitorConnection for MonitorFanout {
    /// Subscribes without filtering; `scope` is left to the consumer.
    async fn monitor_connections(
        &self,
        token: CancellationToken,
        _scope: MonitorScope,
    ) -> Result<EventStream, ChainError> {
        Ok(self.subscribe(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Connection, EventKind};
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    async fn wait_for_count(fanout: &MonitorFanout, n: usize) {
        timeout(WAIT, async {
            while fanout.subscriber_count().await != n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("subscriber count never settled");
    }

    async fn next(stream: &mut EventStream) -> Option<Arc<ConnectionEvent>> {
        timeout(WAIT, stream.recv()).await.expect("stream stalled")
    }

    #[tokio::test]
    async fn three_consumers_then_one_cancelled() {
        let (up, rx) = mpsc::channel(8);
        let fanout = MonitorFanout::new(rx);

        let tokens: Vec<CancellationToken> = (0..3).map(|_| CancellationToken::new()).collect();
        let mut streams: Vec<EventStream> = tokens.iter().map(|t| fanout.subscribe(t.clone())).collect();
        wait_for_count(&fanout, 3).await;

        let down = ConnectionEvent::down("c1");
        let down_seq = down.seq;
        up.send(down).await.unwrap();
        for s in streams.iter_mut() {
            let ev = next(s).await.unwrap();
            assert_eq!(ev.seq, down_seq);
            assert!(ev.is_down_for("c1"));
            assert!(s.try_recv().is_none());
        }

        tokens[1].cancel();
        wait_for_count(&fanout, 2).await;

        let upd = ConnectionEvent::update(Connection::new("c1", "svc"));
        let up_seq = upd.seq;
        up.send(upd).await.unwrap();

        assert_eq!(next(&mut streams[0]).await.unwrap().seq, up_seq);
        assert_eq!(next(&mut streams[2]).await.unwrap().seq, up_seq);
        assert!(next(&mut streams[1]).await.is_none());
        assert!(streams[1].is_terminated());
    }

    #[tokio::test]
    async fn no_delivery_after_close() {
        let (up, rx) = mpsc::channel(8);
        let fanout = MonitorFanout::new(rx);

        let token = CancellationToken::new();
        let mut closed = fanout.subscribe(token.clone());
        let mut witness = fanout.subscribe(CancellationToken::new());
        wait_for_count(&fanout, 2).await;

        token.cancel();
        wait_for_count(&fanout, 1).await;

        up.send(ConnectionEvent::down("c1")).await.unwrap();
        // Once the witness has it, the delivery job is done.
        assert!(next(&mut witness).await.is_some());
        assert!(next(&mut closed).await.is_none());
    }

    #[tokio::test]
    async fn events_arrive_in_upstream_order() {
        let (up, rx) = mpsc::channel(64);
        let fanout = MonitorFanout::new(rx);
        let mut a = fanout.subscribe(CancellationToken::new());
        let mut b = fanout.subscribe(CancellationToken::new());
        wait_for_count(&fanout, 2).await;

        let mut sent = Vec::new();
        for i in 0..20 {
            let ev = ConnectionEvent::update(Connection::new(format!("c{i}"), "svc"));
            sent.push(ev.seq);
            up.send(ev).await.unwrap();
        }
        for s in [&mut a, &mut b] {
            let mut got = Vec::new();
            for _ in 0..20 {
                got.push(next(s).await.unwrap().seq);
            }
            assert_eq!(got, sent);
        }
    }

    #[tokio::test]
    async fn full_queue_holds_back_every_subscriber() {
        let (up, rx) = mpsc::channel(8);
        let fanout = MonitorFanout::with_capacity(ReceiverStream::new(rx), 1);
        let mut slow = fanout.subscribe(CancellationToken::new());
        let mut fast = fanout.subscribe(CancellationToken::new());
        wait_for_count(&fanout, 2).await;

        for _ in 0..3 {
            up.send(ConnectionEvent::new(EventKind::Update)).await.unwrap();
        }

        // First event reaches both; the second is stuck behind `slow`'s full queue.
        assert!(next(&mut fast).await.is_some());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fast.try_recv().is_none());

        // Draining the slow consumer releases delivery.
        for _ in 0..3 {
            assert!(next(&mut slow).await.is_some());
        }
        assert!(next(&mut fast).await.is_some());
        assert!(next(&mut fast).await.is_some());
    }

    #[tokio::test]
    async fn dropped_stream_does_not_block_delivery() {
        let (up, rx) = mpsc::channel(8);
        let fanout = MonitorFanout::with_capacity(ReceiverStream::new(rx), 1);
        drop(fanout.subscribe(CancellationToken::new()));
        let mut live = fanout.subscribe(CancellationToken::new());
        wait_for_count(&fanout, 2).await;

        for _ in 0..3 {
            up.send(ConnectionEvent::new(EventKind::Update)).await.unwrap();
            assert!(next(&mut live).await.is_some());
        }
    }

    #[tokio::test]
    async fn upstream_end_leaves_subscribers_open() {
        let (up, rx) = mpsc::channel(8);
        let fanout = MonitorFanout::new(rx);
        let token = CancellationToken::new();
        let mut s = fanout.subscribe(token.clone());
        wait_for_count(&fanout, 1).await;

        up.send(ConnectionEvent::down("c1")).await.unwrap();
        drop(up);
        assert!(next(&mut s).await.is_some());

        // Silent, not closed.
        assert!(timeout(Duration::from_millis(50), s.recv()).await.is_err());
        assert_eq!(fanout.subscriber_count().await, 1);

        token.cancel();
        assert!(next(&mut s).await.is_none());
    }

    #[tokio::test]
    async fn monitor_connections_subscribes() {
        let (up, rx) = mpsc::channel(8);
        let fanout = MonitorFanout::new(rx);
        let token = CancellationToken::new();
        let mut s = fanout
            .monitor_connections(token.clone(), MonitorScope::connection("c1"))
            .await
            .unwrap();
        wait_for_count(&fanout, 1).await;

        up.send(ConnectionEvent::down("c1")).await.unwrap();
        assert!(next(&mut s).await.unwrap().is_down_for("c1"));
        token.cancel();
        wait_for_count(&fanout, 0).await;
    }
}
