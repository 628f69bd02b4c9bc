//! # Downstream peer interfaces.
//!
//! The transport that reaches a peer is outside this crate. Stages see a
//! peer only through these traits:
//! - [`MonitorConnection`] opens a stream of connection events;
//! - [`ClientConn`] adds identity and a liveness probe.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ChainError;
use crate::events::{EventStream, MonitorScope};

/// Source of connection events for a scope.
#[async_trait]
pub trait MonitorConnection: Send + Sync + 'static {
    /// Opens an event stream. The stream lives until `token` is cancelled or
    /// the source ends it.
    async fn monitor_connections(
        &self,
        token: CancellationToken,
        scope: MonitorScope,
    ) -> Result<EventStream, ChainError>;
}

/// Handle to an established downstream peer.
#[async_trait]
pub trait ClientConn: MonitorConnection {
    /// Peer address or name (for logs).
    fn target(&self) -> &str;

    /// No-argument liveness probe. Any error means the peer is unhealthy.
    async fn ping(&self) -> Result<(), ChainError>;
}
