//! # Monitor: background watch and recovery loop for one connection.
//!
//! ```text
//!              ┌──────────────────────────── recovered ───────────────────────────┐
//!              ▼                                                                  │
//!   ┌─────────────────────┐  probe err/timeout   ┌───────────────────────────┐    │
//!   │ Probing             │  or "down" event     │ Recovering                │    │
//!   │  - ticker(interval) ├─────────────────────►│  - close(conn)  via chain ├────┘
//!   │  - event stream     │  or stream ended     │  - request(conn) via chain│
//!   └─────────┬───────────┘                      │  - reopen event stream    │
//!             │                                  └──────┬─────────────┬──────┘
//!             │ token cancelled                         │ Err         │ token cancelled /
//!             ▼                                         ▼             │ non-retryable Err
//!   ┌─────────────────────┐                     backoff sleep ──► retry│
//!   │ Terminated          │◄───────────────────────────────────────────┘
//!   └─────────────────────┘
//! ```
//!
//! ## Rules
//! - The monitor token is a child of the chain token: retiring the monitor
//!   or shutting the chain down both land in *Terminated*.
//! - The event subscription runs under its own child token, cancelled before
//!   every re-dial and on termination.
//! - Probes are bounded by [`HealConfig::probe_timeout`].
//! - Recovery failures are logged and retried with [`BackoffPolicy`](crate::BackoffPolicy)
//!   delays. The backoff resets only once a connection has stayed healthy
//!   for a full probe interval; a connection that fails sooner (e.g. its
//!   event stream ends at once) waits `next_delay()` before the re-dial.
//! - Nothing raised here reaches a caller.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::chain::{CallContext, ClientConn, NetworkServiceClient, ServiceRequest, Values};
use crate::error::ChainError;
use crate::events::{Connection, EventStream, MonitorScope};

use super::{
    config::HealConfig,
    liveness::LivenessCheck,
    registry::{MonitorId, MonitorRegistry},
};

/// Why a probing monitor gave up on its connection.
#[derive(Debug)]
enum Failure {
    /// Liveness probe failed or timed out.
    Probe(ChainError),
    /// The peer reported the connection down.
    Down { seq: u64 },
    /// The peer ended the event stream.
    StreamClosed,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Probe(err) => write!(f, "liveness probe failed: {err}"),
            Failure::Down { seq } => write!(f, "connection down event (seq={seq})"),
            Failure::StreamClosed => write!(f, "monitor stream closed"),
        }
    }
}

/// State owned by one running monitor.
pub(super) struct Monitor {
    pub id: MonitorId,
    pub token: CancellationToken,
    pub conn: Connection,
    pub cc: Arc<dyn ClientConn>,
    pub events: EventStream,
    pub sub_token: CancellationToken,
    pub values: Values,
    pub pipeline: Arc<dyn NetworkServiceClient>,
    pub liveness: Arc<dyn LivenessCheck>,
    pub cfg: HealConfig,
    pub registry: Arc<MonitorRegistry>,
}

impl Monitor {
    /// Runs until the monitor token is cancelled or recovery becomes pointless.
    pub async fn run(self) {
        let span = tracing::debug_span!("heal_monitor", conn_id = %self.conn.id, monitor = %self.id);
        self.run_inner().instrument(span).await
    }

    async fn run_inner(mut self) {
        let _running = self.registry.track();
        let token = self.token.clone();
        let mut backoff = self.cfg.recovery_backoff.start();

        'monitor: loop {
            let probing_since = Instant::now();
            let failure = tokio::select! {
                _ = token.cancelled() => break 'monitor,
                failure = self.watch() => failure,
            };

            if probing_since.elapsed() >= self.cfg.probe_interval() {
                backoff.reset();
            } else {
                // Failed again before one probe interval passed: pace the re-dial.
                let delay = backoff.next_delay();
                tracing::info!(%failure, delay = ?delay, "connection failed right after establishment; delaying recovery");
                if !pause(&token, delay).await {
                    break 'monitor;
                }
            }
            tracing::info!(%failure, peer = self.cc.target(), "connection unhealthy; recovering");

            loop {
                let outcome = tokio::select! {
                    _ = token.cancelled() => break 'monitor,
                    outcome = self.recover() => outcome,
                };
                match outcome {
                    Ok(()) => {
                        tracing::info!(
                            peer = self.cc.target(),
                            failures = backoff.failures(),
                            "connection healed"
                        );
                        break;
                    }
                    Err(err) if !err.is_retryable() => {
                        tracing::debug!(error = %err, "recovery abandoned");
                        break 'monitor;
                    }
                    Err(err) => {
                        let delay = backoff.next_delay();
                        tracing::warn!(
                            error = %err,
                            attempt = backoff.failures(),
                            delay = ?delay,
                            "recovery failed; retrying"
                        );
                        if !pause(&token, delay).await {
                            break 'monitor;
                        }
                    }
                }
            }
        }

        self.terminate().await;
    }

    /// *Probing*: resolves with the first failure either watch sees.
    async fn watch(&mut self) -> Failure {
        let probing = probe_loop(
            self.liveness.as_ref(),
            &self.cc,
            &self.conn,
            self.cfg.probe_interval(),
            self.cfg.probe_timeout(),
        );
        let scope = MonitorScope::connection(&self.conn.id);
        let watching = event_loop(&mut self.events, &scope, &self.conn.id);

        tokio::select! {
            failure = probing => failure,
            failure = watching => failure,
        }
    }

    /// *Recovering*: one close + request round through the full pipeline.
    async fn recover(&mut self) -> Result<(), ChainError> {
        self.sub_token.cancel();

        let mut close_ctx = self.call_context();
        close_ctx.set_client_conn(Arc::clone(&self.cc));
        if let Err(err) = self.pipeline.close(&mut close_ctx, self.conn.clone()).await {
            if !err.is_retryable() {
                return Err(err);
            }
            tracing::debug!(error = %err, "close before re-request failed");
        }

        let mut ctx = self.call_context();
        let conn = self
            .pipeline
            .request(&mut ctx, ServiceRequest::new(self.conn.clone()))
            .await?;
        let cc = ctx.client_conn().unwrap_or_else(|| Arc::clone(&self.cc));
        self.conn = conn;
        self.cc = cc;

        let sub_token = self.token.child_token();
        let scope = MonitorScope::connection(&self.conn.id);
        match self.cc.monitor_connections(sub_token.clone(), scope).await {
            Ok(events) => {
                self.events = events;
                self.sub_token = sub_token;
                Ok(())
            }
            Err(err) => {
                sub_token.cancel();
                Err(ChainError::monitor_setup(err))
            }
        }
    }

    /// Context for calls this monitor makes on behalf of the original caller.
    fn call_context(&self) -> CallContext {
        CallContext::resume(self.token.child_token(), self.values.clone()).with_recovery(self.id)
    }

    /// *Terminated*: release the subscription and the registry entry.
    async fn terminate(self) {
        self.sub_token.cancel();
        self.token.cancel();
        self.registry.release(&self.conn.id, self.id).await;
        tracing::debug!("monitor terminated");
    }
}

/// Sleeps for `delay`; `false` if `token` fired first.
async fn pause(token: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = time::sleep(delay) => true,
        _ = token.cancelled() => false,
    }
}

/// Probes every `interval`, each probe bounded by `timeout`.
async fn probe_loop(
    check: &dyn LivenessCheck,
    cc: &Arc<dyn ClientConn>,
    conn: &Connection,
    interval: Duration,
    timeout: Duration,
) -> Failure {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match time::timeout(timeout, check.check(cc, conn)).await {
            Ok(Ok(())) => tracing::trace!("liveness probe ok"),
            Ok(Err(err)) => return Failure::Probe(err),
            Err(_elapsed) => return Failure::Probe(ChainError::Timeout { timeout }),
        }
    }
}

/// Waits for a "down" event for `conn_id` or the end of the stream.
async fn event_loop(events: &mut EventStream, scope: &MonitorScope, conn_id: &str) -> Failure {
    loop {
        match events.recv().await {
            Some(ev) if !scope.matches(&ev) => {}
            Some(ev) if ev.is_down_for(conn_id) => return Failure::Down { seq: ev.seq },
            Some(ev) => tracing::trace!(seq = ev.seq, kind = ?ev.kind, "monitor event"),
            None => return Failure::StreamClosed,
        }
    }
}
