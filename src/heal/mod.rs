//! Self-healing chain element.
//!
//! Internal modules:
//! - [`client`]: the [`HealClient`] element (request/close hooks);
//! - [`monitor`]: per-connection probe/recover loop;
//! - [`registry`]: at-most-one monitor per connection id;
//! - [`liveness`]: pluggable liveness probes;
//! - [`builder`], [`config`]: construction and tuning.

mod builder;
mod client;
mod config;
mod liveness;
mod monitor;
mod registry;

pub use builder::HealBuilder;
pub use client::HealClient;
pub use config::HealConfig;
pub use liveness::{LivenessCheck, LivenessFn, PingCheck};
pub use registry::MonitorId;
