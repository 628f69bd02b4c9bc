//! Runtime core.
//!
//! - [`executor`]: serial FIFO job queue used to order shared-state mutations.

mod executor;

pub use executor::SerialExecutor;
