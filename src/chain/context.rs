//! # Call context and value carriage.
//!
//! Every pipeline call gets a [`CallContext`]. It is passed by `&mut` so a
//! downstream stage can leave the [`ClientConn`] it dialed behind for the
//! stages above it to pick up once the call unwinds.
//!
//! Caller-supplied values live in [`Values`], a cheap-to-clone immutable
//! snapshot. A background task that outlives the call takes a snapshot and
//! later rebuilds a context around it with [`CallContext::resume`].
//!
//! ```text
//!  caller ctx (short-lived) ──► values().clone() ──► snapshot (Arc)
//!                                                       │
//!  chain token ─► child token ──────────────────────────┴──► CallContext::resume(..)
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::chain::ClientConn;
use crate::heal::MonitorId;

/// Immutable key/value pairs supplied by the original caller.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Values(Arc<BTreeMap<String, String>>);

impl Values {
    /// Returns a copy with `key` set to `value`. Other holders are unaffected.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.0).insert(key.into(), value.into());
        self
    }

    /// Looks up a value.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Number of values.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no values are set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Values {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.iter()).finish()
    }
}

/// Per-call context threaded through every pipeline stage.
#[derive(Clone, Default)]
pub struct CallContext {
    token: CancellationToken,
    values: Values,
    client_conn: Option<Arc<dyn ClientConn>>,
    /// Set on calls a recovering monitor issues through the pipeline.
    pub(crate) recovery: Option<MonitorId>,
}

impl CallContext {
    /// Fresh context with its own token and no values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a context from a captured value snapshot under a new lifetime.
    pub fn resume(token: CancellationToken, values: Values) -> Self {
        Self {
            token,
            values,
            client_conn: None,
            recovery: None,
        }
    }

    /// Replaces the call's cancellation token.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Adds a caller value.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values = self.values.with(key, value);
        self
    }

    /// Cancellation token bounding this call.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// True once the call has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Caller values carried by this call.
    pub fn values(&self) -> &Values {
        &self.values
    }

    /// Handle to the downstream peer, once a stage has stored one.
    pub fn client_conn(&self) -> Option<Arc<dyn ClientConn>> {
        self.client_conn.clone()
    }

    /// Stores the downstream peer handle for the stages above.
    pub fn set_client_conn(&mut self, cc: Arc<dyn ClientConn>) {
        self.client_conn = Some(cc);
    }

    /// Removes and returns the downstream peer handle.
    pub fn take_client_conn(&mut self) -> Option<Arc<dyn ClientConn>> {
        self.client_conn.take()
    }

    pub(crate) fn with_recovery(mut self, id: MonitorId) -> Self {
        self.recovery = Some(id);
        self
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("cancelled", &self.token.is_cancelled())
            .field("values", &self.values)
            .field("client_conn", &self.client_conn.as_ref().map(|cc| cc.target().to_string()))
            .field("recovery", &self.recovery)
            .finish()
    }
}
