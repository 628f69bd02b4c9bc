//! # Connection records and connection-state events.
//!
//! A [`ConnectionEvent`] is an immutable notification that the state of one or
//! more [`Connection`]s changed. Events are shared between subscribers as
//! `Arc<ConnectionEvent>`; nothing mutates them after construction.
//!
//! ## Ordering
//! Each event gets a process-wide sequence number (`seq`) when it is built.
//! Subscribers of the same broadcaster see events in delivery order; `seq`
//! lets logs correlate them across subscribers.
//!
//! ## Example
//! ```rust
//! use connheal::{Connection, ConnectionEvent, EventKind};
//!
//! let ev = ConnectionEvent::down("c1");
//! assert_eq!(ev.kind, EventKind::Delete);
//! assert!(ev.is_down_for("c1"));
//! assert!(!ev.is_down_for("c2"));
//!
//! let up = ConnectionEvent::update(Connection::new("c1", "svc"));
//! assert!(!up.is_down_for("c1"));
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Global sequence counter for connection events.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Data-plane state of a connection as reported by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Connection is established and passing traffic.
    #[default]
    Up,
    /// Connection exists but the peer reports it unusable.
    Down,
}

/// A connection record as seen by the pipeline.
///
/// `id` is the stable key of the logical connection; it survives every
/// re-establishment performed by the healing element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    /// Stable logical connection id.
    pub id: String,
    /// Network service this connection attaches to.
    pub network_service: String,
    /// Last known state.
    pub state: ConnectionState,
    /// Free-form labels set by pipeline stages (e.g. the serving peer).
    pub labels: HashMap<String, String>,
}

impl Connection {
    /// Creates an `Up` connection without labels.
    pub fn new(id: impl Into<String>, network_service: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            network_service: network_service.into(),
            state: ConnectionState::Up,
            labels: HashMap::new(),
        }
    }

    /// Sets a label.
    #[inline]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Sets the state.
    #[inline]
    pub fn with_state(mut self, state: ConnectionState) -> Self {
        self.state = state;
        self
    }
}

/// Classification of connection events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Full snapshot sent when a monitor stream opens.
    InitialStateTransfer,
    /// One or more connections changed.
    Update,
    /// One or more connections are gone.
    Delete,
}

/// Connection-state notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Event classification.
    pub kind: EventKind,
    /// Affected connections keyed by connection id.
    pub connections: BTreeMap<String, Connection>,
}

impl ConnectionEvent {
    /// Creates an empty event of the given kind with the next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            kind,
            connections: BTreeMap::new(),
        }
    }

    /// Adds (or replaces) a connection in this event.
    #[inline]
    pub fn with_connection(mut self, conn: Connection) -> Self {
        self.connections.insert(conn.id.clone(), conn);
        self
    }

    /// `Delete` event for a single connection id.
    pub fn down(id: impl Into<String>) -> Self {
        let id = id.into();
        let conn = Connection::new(id, "").with_state(ConnectionState::Down);
        Self::new(EventKind::Delete).with_connection(conn)
    }

    /// `Update` event carrying one connection.
    pub fn update(conn: Connection) -> Self {
        Self::new(EventKind::Update).with_connection(conn)
    }

    /// True if this event reports connection `id` as gone or down.
    pub fn is_down_for(&self, id: &str) -> bool {
        match (self.kind, self.connections.get(id)) {
            (_, None) => false,
            (EventKind::Delete, Some(_)) => true,
            (_, Some(conn)) => conn.state == ConnectionState::Down,
        }
    }

    /// True if this event mentions connection `id` at all.
    #[inline]
    pub fn concerns(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }
}

/// Selector a monitor subscription is opened with.
///
/// An empty scope means "everything the peer knows about".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorScope {
    /// Connection ids of interest.
    pub connection_ids: Vec<String>,
}

impl MonitorScope {
    /// Scope for a single connection.
    pub fn connection(id: impl Into<String>) -> Self {
        Self {
            connection_ids: vec![id.into()],
        }
    }

    /// True if `ev` falls into this scope.
    pub fn matches(&self, ev: &ConnectionEvent) -> bool {
        self.connection_ids.is_empty() || self.connection_ids.iter().any(|id| ev.concerns(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_is_monotonic() {
        let a = ConnectionEvent::new(EventKind::Update);
        let b = ConnectionEvent::new(EventKind::Update);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn update_with_down_state_counts_as_down() {
        let conn = Connection::new("c1", "svc").with_state(ConnectionState::Down);
        let ev = ConnectionEvent::update(conn);
        assert!(ev.is_down_for("c1"));
    }

    #[test]
    fn initial_transfer_of_healthy_connection_is_not_down() {
        let ev = ConnectionEvent::new(EventKind::InitialStateTransfer)
            .with_connection(Connection::new("c1", "svc"))
            .with_connection(Connection::new("c2", "svc").with_state(ConnectionState::Down));
        assert!(!ev.is_down_for("c1"));
        assert!(ev.is_down_for("c2"));
    }

    #[test]
    fn scope_matching() {
        let ev = ConnectionEvent::down("c1");
        assert!(MonitorScope::default().matches(&ev));
        assert!(MonitorScope::connection("c1").matches(&ev));
        assert!(!MonitorScope::connection("c9").matches(&ev));
    }
}
