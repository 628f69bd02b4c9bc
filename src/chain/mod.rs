//! Pipeline plumbing consumed by the healing element.
//!
//! - [`CallContext`] / [`Values`] per-call context and value carriage
//! - [`Element`], [`Next`], [`Chain`], [`ChainRef`] chain-of-responsibility dispatch
//! - [`NetworkServiceClient`] the request/close contract of a whole pipeline
//! - [`ClientConn`], [`MonitorConnection`] the downstream peer as stages see it

mod conn;
mod context;
mod element;

pub use conn::{ClientConn, MonitorConnection};
pub use context::{CallContext, Values};
pub use element::{Chain, ChainRef, Element, NetworkServiceClient, Next, ServiceRequest};
