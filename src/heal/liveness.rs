//! # Liveness checks.
//!
//! A [`LivenessCheck`] actively probes the downstream peer of a monitored
//! connection. The monitor bounds every probe with the configured timeout, so
//! implementations need not enforce one themselves.
//!
//! - [`PingCheck`] (the default) calls [`ClientConn::ping`] on the peer.
//! - [`LivenessFn`] wraps a closure, producing a fresh future per probe.
//!
//! ```rust
//! use std::sync::Arc;
//! use connheal::{ChainError, ClientConn, Connection, LivenessFn};
//!
//! let check = LivenessFn::arc(|cc: Arc<dyn ClientConn>, _conn: Connection| async move {
//!     cc.ping().await.map_err(|e| ChainError::remote(format!("{}: {e}", cc.target())))
//! });
//! # let _ = check;
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::chain::ClientConn;
use crate::error::ChainError;
use crate::events::Connection;

/// Active health probe for a monitored connection.
#[async_trait]
pub trait LivenessCheck: Send + Sync + 'static {
    /// `Ok` if the peer serving `conn` is healthy.
    async fn check(&self, cc: &Arc<dyn ClientConn>, conn: &Connection) -> Result<(), ChainError>;
}

/// Probes the peer with its own ping.
#[derive(Debug, Default, Clone, Copy)]
pub struct PingCheck;

#[async_trait]
impl LivenessCheck for PingCheck {
    async fn check(&self, cc: &Arc<dyn ClientConn>, _conn: &Connection) -> Result<(), ChainError> {
        cc.ping().await
    }
}

/// Closure-backed liveness check.
pub struct LivenessFn<F> {
    f: F,
}

impl<F> LivenessFn<F> {
    /// Wraps `f`, called with the peer handle and the monitored connection.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the check behind an `Arc`, ready for the builder.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> LivenessCheck for LivenessFn<F>
where
    F: Fn(Arc<dyn ClientConn>, Connection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ChainError>> + Send + 'static,
{
    async fn check(&self, cc: &Arc<dyn ClientConn>, conn: &Connection) -> Result<(), ChainError> {
        (self.f)(Arc::clone(cc), conn.clone()).await
    }
}
