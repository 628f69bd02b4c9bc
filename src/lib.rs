//! # connheal
//!
//! **connheal** provides connection monitoring and self-healing for network
//! service pipelines built as chains of elements.
//!
//! A pipeline establishes connections by passing a request through an ordered
//! list of [`Element`]s. Placing a [`HealClient`] in that list makes every
//! connection it sees established watched in the background: the peer is
//! probed periodically and its event stream is watched for "down" reports.
//! When either fails the connection is re-established through the same
//! pipeline with the caller's original context values.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  caller ──request/close──► Chain ─► [ … ] ─► HealClient ─► [ … ] ─► Dial stage
//!                              ▲                   │                     │
//!                              │                   │ spawn/retire        │ sets ClientConn
//!                              │ ChainRef          ▼                     ▼
//!                              │          ┌──────────────────┐     ┌────────────┐
//!                              └──────────┤ Monitor (per id) │◄────┤ downstream │
//!                         close+request   │  - probe ticker  │ ping│   peer     │
//!                         on failure      │  - event stream  │◄────┤            │
//!                                         └──────────────────┘ evt └─────┬──────┘
//!                                                                        │
//!                                                                 MonitorFanout
//!                                                        (one upstream, many streams)
//! ```
//!
//! ### Monitor lifecycle
//! ```text
//! HealClient::request ──► next.request ──► open subscription ──► Monitor::run()
//!
//! loop {
//!   Probing:
//!   ├─► every liveness_interval: check(cc, conn) bounded by liveness_timeout
//!   ├─► event for conn.id reported down
//!   ├─► event stream ended
//!   │     └─ any of the above ─► Recovering
//!   │          (after backoff.next_delay() if it came within one interval
//!   │           of establishment; otherwise backoff is reset first)
//!   │
//!   Recovering:
//!   ├─► pipeline.close(conn)    (marked as this monitor's own call)
//!   ├─► pipeline.request(conn)  (same values as the original call)
//!   ├─► re-open subscription
//!   │     ├─ Ok  ──► back to Probing
//!   │     └─ Err ──► sleep(backoff.next_delay()) (cancellable), retry
//!   │
//!   └─ exit conditions:
//!        - monitor retired (new request or close for the same id)
//!        - chain token cancelled
//!        - recovery superseded / pipeline gone
//! }
//!
//! On exit: subscription cancelled, registry entry released (if still owned)
//! ```
//!
//! ## Features
//! | Area            | Description                                                 | Key types / traits                                |
//! |-----------------|-------------------------------------------------------------|---------------------------------------------------|
//! | **Pipeline**    | Chain-of-responsibility request/close dispatch.             | [`Element`], [`Chain`], [`ChainRef`], [`Next`]    |
//! | **Healing**     | Per-connection background monitors with recovery.           | [`HealClient`], [`HealBuilder`], [`HealConfig`]   |
//! | **Liveness**    | Pluggable probes (default: the peer's `ping`).              | [`LivenessCheck`], [`PingCheck`], [`LivenessFn`]  |
//! | **Events**      | Connection events and ordered fan-out to subscribers.       | [`ConnectionEvent`], [`MonitorFanout`]            |
//! | **Ordering**    | Single-worker FIFO execution of async jobs.                 | [`SerialExecutor`]                                |
//! | **Policies**    | Backoff/jitter for recovery retries.                        | [`BackoffPolicy`], [`JitterPolicy`]               |
//! | **Errors**      | Typed pipeline errors.                                      | [`ChainError`]                                    |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use async_trait::async_trait;
//! use tokio_util::sync::CancellationToken;
//! use connheal::{
//!     CallContext, Chain, ChainError, ClientConn, Connection, Element, EventStream, HealClient,
//!     MonitorConnection, MonitorFanout, MonitorScope, NetworkServiceClient, Next, ServiceRequest,
//! };
//!
//! struct Peer {
//!     events: MonitorFanout,
//! }
//!
//! #[async_trait]
//! impl MonitorConnection for Peer {
//!     async fn monitor_connections(
//!         &self,
//!         token: CancellationToken,
//!         _scope: MonitorScope,
//!     ) -> Result<EventStream, ChainError> {
//!         Ok(self.events.subscribe(token))
//!     }
//! }
//!
//! #[async_trait]
//! impl ClientConn for Peer {
//!     fn target(&self) -> &str {
//!         "peer-1"
//!     }
//!     async fn ping(&self) -> Result<(), ChainError> {
//!         Ok(())
//!     }
//! }
//!
//! // Last stage: "dials" the peer and hands it to the stages before it.
//! struct Dial {
//!     peer: Arc<Peer>,
//! }
//!
//! #[async_trait]
//! impl Element for Dial {
//!     async fn request(
//!         &self,
//!         ctx: &mut CallContext,
//!         request: ServiceRequest,
//!         next: Next<'_>,
//!     ) -> Result<Connection, ChainError> {
//!         ctx.set_client_conn(self.peer.clone());
//!         next.request(ctx, request).await
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), ChainError> {
//!     let (_upstream, rx) = tokio::sync::mpsc::channel(16);
//!     let peer = Arc::new(Peer { events: MonitorFanout::new(rx) });
//!     let token = CancellationToken::new();
//!
//!     let chain = Chain::build(|pipeline| {
//!         let heal = HealClient::builder(token.clone(), Arc::new(pipeline))
//!             .with_liveness_interval(Duration::from_millis(500))
//!             .build();
//!         let stages: Vec<Arc<dyn Element>> = vec![heal, Arc::new(Dial { peer })];
//!         stages
//!     });
//!
//!     let mut ctx = CallContext::new().with_value("tenant", "blue");
//!     let conn = chain
//!         .request(&mut ctx, ServiceRequest::new(Connection::new("c1", "svc")))
//!         .await?;
//!
//!     // ... "c1" is now probed and healed in the background ...
//!
//!     chain.close(&mut CallContext::new(), conn).await?;
//!     token.cancel();
//!     Ok(())
//! }
//! ```

mod chain;
mod core;
mod error;
mod events;
mod heal;
mod policies;

// ---- Public re-exports ----

pub use chain::{
    CallContext, Chain, ChainRef, ClientConn, Element, MonitorConnection, NetworkServiceClient,
    Next, ServiceRequest, Values,
};
pub use core::SerialExecutor;
pub use error::ChainError;
pub use events::{
    Connection, ConnectionEvent, ConnectionState, DEFAULT_QUEUE_CAPACITY, EventKind, EventStream,
    MonitorFanout, MonitorScope,
};
pub use heal::{
    HealBuilder, HealClient, HealConfig, LivenessCheck, LivenessFn, MonitorId, PingCheck,
};
pub use policies::{Backoff, BackoffPolicy, JitterPolicy};
