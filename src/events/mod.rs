//! Connection events and their in-process fan-out.
//!
//! ## Contents
//! - [`Connection`], [`ConnectionEvent`], [`EventKind`], [`MonitorScope`] data model
//! - [`EventStream`] consumer side of one subscription
//! - [`MonitorFanout`] broadcaster from one upstream source to many streams
//!
//! ## Quick reference
//! - **Producers**: a downstream peer's monitor stream (the upstream source).
//! - **Consumers**: healing monitors, one subscription per monitored connection.

mod event;
mod fanout;
mod stream;

pub use event::{Connection, ConnectionEvent, ConnectionState, EventKind, MonitorScope};
pub use fanout::{DEFAULT_QUEUE_CAPACITY, MonitorFanout};
pub use stream::EventStream;
