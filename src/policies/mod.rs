//! Retry policies for recovering monitors.
//!
//! - [`BackoffPolicy`] the delay curve between failed recovery attempts
//! - [`Backoff`] per-episode cursor over that curve
//! - [`JitterPolicy`] randomization to avoid synchronized retries

mod backoff;
mod jitter;

pub use backoff::{Backoff, BackoffPolicy};
pub use jitter::JitterPolicy;
