//! # HealClient: the self-healing pipeline stage.
//!
//! On every successful request that leaves a [`ClientConn`] in the context,
//! the element starts one background monitor for the connection. The monitor
//! probes the peer and watches its event stream; on failure it re-issues
//! close + request through the full pipeline until the connection is back.
//!
//! ## Request / close
//! ```text
//! request(ctx, req)                            close(ctx, conn)
//!   ├─► begin: retire monitor[req.id],           ├─► retire monitor[conn.id] (if any),
//!   │   register a pending handle                │   void pending handles for conn.id
//!   ├─► values = ctx.values() snapshot           └─► next.close(ctx, conn)
//!   ├─► conn = next.request(ctx, req)?
//!   ├─► no ClientConn in ctx ─► Ok(conn)
//!   ├─► open monitor subscription
//!   │     └─ Err ─► next.close(conn) (best effort) ─► Err(MonitorSetup)
//!   ├─► install pending handle (cancels any concurrent one)
//!   │     └─ voided by a close ─► next.close(conn) (best effort) ─► Err(Superseded)
//!   └─► spawn monitor ─► Ok(conn)
//! ```
//!
//! ## Calls from a recovering monitor
//! The monitor marks its own calls with its [`MonitorId`]. Such calls do not
//! retire the monitor that issued them:
//! - close is forwarded only while the monitor still owns the connection;
//! - request is forwarded, and its result is kept only if the monitor still
//!   owns the connection afterwards. Otherwise the fresh connection is
//!   closed again and [`ChainError::Superseded`] returned.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::chain::{
    CallContext, ClientConn, Element, NetworkServiceClient, Next, ServiceRequest, Values,
};
use crate::error::ChainError;
use crate::events::{Connection, EventStream, MonitorScope};

use super::{
    builder::HealBuilder,
    config::HealConfig,
    liveness::LivenessCheck,
    monitor::Monitor,
    registry::{MonitorHandle, MonitorId, MonitorRegistry},
};

/// Chain element that keeps established connections alive.
pub struct HealClient {
    chain_token: CancellationToken,
    pipeline: Arc<dyn NetworkServiceClient>,
    liveness: Arc<dyn LivenessCheck>,
    cfg: HealConfig,
    registry: Arc<MonitorRegistry>,
}

impl HealClient {
    /// Starts a [`HealBuilder`].
    pub fn builder(
        chain_token: CancellationToken,
        pipeline: Arc<dyn NetworkServiceClient>,
    ) -> HealBuilder {
        HealBuilder::new(chain_token, pipeline)
    }

    pub(super) fn new_internal(
        chain_token: CancellationToken,
        pipeline: Arc<dyn NetworkServiceClient>,
        liveness: Arc<dyn LivenessCheck>,
        cfg: HealConfig,
        registry: Arc<MonitorRegistry>,
    ) -> Self {
        Self {
            chain_token,
            pipeline,
            liveness,
            cfg,
            registry,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &HealConfig {
        &self.cfg
    }

    /// True if a monitor is registered for `conn_id`.
    pub async fn is_monitored(&self, conn_id: &str) -> bool {
        self.registry.contains(conn_id).await
    }

    /// Sorted ids of monitored connections.
    pub async fn monitored(&self) -> Vec<String> {
        self.registry.list().await
    }

    /// Monitor tasks currently running (not yet terminated).
    pub fn running_monitors(&self) -> usize {
        self.registry.running()
    }

    /// Subscribes to the peer's events for `conn` under `token`.
    async fn open_monitor(
        cc: &Arc<dyn ClientConn>,
        conn: &Connection,
        token: CancellationToken,
    ) -> Result<EventStream, ChainError> {
        cc.monitor_connections(token, MonitorScope::connection(&conn.id))
            .await
    }

    fn spawn_monitor(
        &self,
        handle: MonitorHandle,
        conn: Connection,
        cc: Arc<dyn ClientConn>,
        events: EventStream,
        sub_token: CancellationToken,
        values: Values,
    ) {
        let monitor = Monitor {
            id: handle.id,
            token: handle.token,
            conn,
            cc,
            events,
            sub_token,
            values,
            pipeline: Arc::clone(&self.pipeline),
            liveness: Arc::clone(&self.liveness),
            cfg: self.cfg.clone(),
            registry: Arc::clone(&self.registry),
        };
        tokio::spawn(monitor.run());
    }

    async fn recovery_request(
        &self,
        ctx: &mut CallContext,
        request: ServiceRequest,
        next: Next<'_>,
        id: MonitorId,
    ) -> Result<Connection, ChainError> {
        let conn_id = request.connection.id.clone();
        if !self.registry.is_owner(&conn_id, id).await {
            return Err(ChainError::Superseded { id: conn_id });
        }

        let conn = next.request(ctx, request).await?;
        if self.registry.is_owner(&conn_id, id).await {
            return Ok(conn);
        }

        // Retired while re-dialing: undo.
        if let Err(err) = next.close(ctx, conn).await {
            tracing::debug!(conn_id = %conn_id, monitor = %id, error = %err, "close of superseded recovery failed");
        }
        Err(ChainError::Superseded { id: conn_id })
    }

    /// Best-effort close of a connection this element will not monitor.
    async fn cleanup_close(next: Next<'_>, values: Values, cc: Arc<dyn ClientConn>, conn: Connection) {
        let conn_id = conn.id.clone();
        let mut close_ctx = CallContext::resume(CancellationToken::new(), values);
        close_ctx.set_client_conn(cc);
        if let Err(err) = next.close(&mut close_ctx, conn).await {
            tracing::debug!(conn_id = %conn_id, error = %err, "cleanup close failed");
        }
    }
}

#[async_trait]
impl Element for HealClient {
    async fn request(
        &self,
        ctx: &mut CallContext,
        request: ServiceRequest,
        next: Next<'_>,
    ) -> Result<Connection, ChainError> {
        if let Some(id) = ctx.recovery {
            return self.recovery_request(ctx, request, next, id).await;
        }

        let conn_id = request.connection.id.clone();
        let handle = self.registry.begin(&conn_id, &self.chain_token).await;
        let values = ctx.values().clone();

        let conn = match next.request(ctx, request).await {
            Ok(conn) => conn,
            Err(err) => {
                self.registry.abandon(&conn_id, handle.id).await;
                return Err(err);
            }
        };
        let Some(cc) = ctx.client_conn() else {
            self.registry.abandon(&conn_id, handle.id).await;
            return Ok(conn);
        };

        let sub_token = handle.token.child_token();
        let events = match Self::open_monitor(&cc, &conn, sub_token.clone()).await {
            Ok(events) => events,
            Err(err) => {
                handle.token.cancel();
                self.registry.abandon(&conn_id, handle.id).await;
                Self::cleanup_close(next, values, cc, conn).await;
                tracing::warn!(conn_id = %conn_id, error = %err, "unable to monitor connection");
                return Err(ChainError::monitor_setup(err));
            }
        };

        if !self.registry.install(&conn_id, handle.clone()).await {
            // Closed by the caller while this request was in flight.
            handle.token.cancel();
            Self::cleanup_close(next, values, cc, conn).await;
            tracing::debug!(conn_id = %conn_id, "request superseded by close");
            return Err(ChainError::Superseded { id: conn_id });
        }

        tracing::debug!(conn_id = %conn_id, monitor = %handle.id, peer = cc.target(), "monitor started");
        self.spawn_monitor(handle, conn.clone(), cc, events, sub_token, values);
        Ok(conn)
    }

    async fn close(
        &self,
        ctx: &mut CallContext,
        conn: Connection,
        next: Next<'_>,
    ) -> Result<(), ChainError> {
        let Some(id) = ctx.recovery else {
            self.registry.retire(&conn.id).await;
            return next.close(ctx, conn).await;
        };
        if !self.registry.is_owner(&conn.id, id).await {
            return Err(ChainError::Superseded { id: conn.id });
        }
        next.close(ctx, conn).await
    }
}
