//! # Monitor registry: at most one monitor per logical connection.
//!
//! Maps a connection id to the handle of the monitor currently watching it.
//!
//! ## Rules
//! - A caller request first calls `begin`: the current monitor is retired and
//!   a fresh handle is registered as *pending* for the id, in one write.
//! - `install` promotes a pending handle; a displaced handle is cancelled
//!   before the write lock is released, so two live handles never coexist
//!   for one id. A handle that is no longer pending is refused.
//! - `retire` (a caller close) removes and cancels the monitor and voids every
//!   pending handle for the id, so a request still in flight cannot install
//!   a monitor for a connection that was closed under it.
//! - `release` removes only if the caller still owns the entry, so a monitor
//!   exiting late cannot evict its successor.
//! - Cancelling a handle twice is harmless (`CancellationToken` is idempotent).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Process-wide monitor id sequence.
static MONITOR_SEQ: AtomicU64 = AtomicU64::new(1);

/// Identity of one monitor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MonitorId(u64);

impl MonitorId {
    pub(crate) fn next() -> Self {
        Self(MONITOR_SEQ.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

/// Cancellation handle of a running monitor.
#[derive(Debug, Clone)]
pub(crate) struct MonitorHandle {
    pub id: MonitorId,
    pub token: CancellationToken,
}

impl MonitorHandle {
    /// New handle bound to `parent` (the chain lifetime).
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            id: MonitorId::next(),
            token: parent.child_token(),
        }
    }
}

#[derive(Default)]
struct Slots {
    /// Connection id → live monitor.
    monitors: HashMap<String, MonitorHandle>,
    /// Connection id → handles of caller requests still in flight.
    pending: HashMap<String, Vec<MonitorId>>,
}

impl Slots {
    fn unpend(&mut self, conn_id: &str, id: MonitorId) -> bool {
        let Some(ids) = self.pending.get_mut(conn_id) else {
            return false;
        };
        let before = ids.len();
        ids.retain(|p| *p != id);
        let found = ids.len() != before;
        if ids.is_empty() {
            self.pending.remove(conn_id);
        }
        found
    }
}

#[derive(Default)]
pub(crate) struct MonitorRegistry {
    slots: RwLock<Slots>,
    running: Arc<AtomicUsize>,
}

impl MonitorRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Retires the current monitor for `conn_id` and registers a pending
    /// handle (child of `parent`) for the request that is about to run.
    pub async fn begin(&self, conn_id: &str, parent: &CancellationToken) -> MonitorHandle {
        let handle = MonitorHandle::new(parent);
        let mut slots = self.slots.write().await;
        if let Some(prev) = slots.monitors.remove(conn_id) {
            prev.token.cancel();
            tracing::debug!(conn_id, monitor = %prev.id, "monitor retired by new request");
        }
        slots
            .pending
            .entry(conn_id.to_string())
            .or_default()
            .push(handle.id);
        handle
    }

    /// Drops a pending handle whose request produced nothing to monitor.
    pub async fn abandon(&self, conn_id: &str, id: MonitorId) {
        self.slots.write().await.unpend(conn_id, id);
    }

    /// Installs the pending `handle` for `conn_id`, cancelling whatever it
    /// displaces. Returns `false` (and installs nothing) if the handle was
    /// voided by a close since `begin`.
    pub async fn install(&self, conn_id: &str, handle: MonitorHandle) -> bool {
        let mut slots = self.slots.write().await;
        if !slots.unpend(conn_id, handle.id) {
            return false;
        }
        if let Some(prev) = slots.monitors.insert(conn_id.to_string(), handle) {
            prev.token.cancel();
            tracing::debug!(conn_id, monitor = %prev.id, "displaced concurrent monitor");
        }
        true
    }

    /// Removes and cancels the monitor for `conn_id` and voids pending
    /// requests for it. Returns whether a monitor existed.
    pub async fn retire(&self, conn_id: &str) -> bool {
        let mut slots = self.slots.write().await;
        if let Some(voided) = slots.pending.remove(conn_id) {
            tracing::debug!(conn_id, requests = voided.len(), "in-flight requests voided by close");
        }
        match slots.monitors.remove(conn_id) {
            Some(handle) => {
                handle.token.cancel();
                tracing::debug!(conn_id, monitor = %handle.id, "monitor retired");
                true
            }
            None => false,
        }
    }

    /// Removes the entry for `conn_id` if `id` still owns it.
    pub async fn release(&self, conn_id: &str, id: MonitorId) -> bool {
        let mut slots = self.slots.write().await;
        if slots.monitors.get(conn_id).is_some_and(|h| h.id == id) {
            slots.monitors.remove(conn_id);
            true
        } else {
            false
        }
    }

    /// True if `id` is the registered monitor for `conn_id`.
    pub async fn is_owner(&self, conn_id: &str, id: MonitorId) -> bool {
        self.slots
            .read()
            .await
            .monitors
            .get(conn_id)
            .is_some_and(|h| h.id == id)
    }

    pub async fn contains(&self, conn_id: &str) -> bool {
        self.slots.read().await.monitors.contains_key(conn_id)
    }

    /// Sorted ids of monitored connections.
    pub async fn list(&self) -> Vec<String> {
        let slots = self.slots.read().await;
        let mut ids: Vec<String> = slots.monitors.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Monitor tasks that have started and not yet terminated.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    /// Counts a monitor task as running until the guard drops.
    pub fn track(&self) -> RunningGuard {
        self.running.fetch_add(1, Ordering::AcqRel);
        RunningGuard {
            running: Arc::clone(&self.running),
        }
    }
}

/// Decrements the running-monitor count on drop.
pub(crate) struct RunningGuard {
    running: Arc<AtomicUsize>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::AcqRel);
    }
}
