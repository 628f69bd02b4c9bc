//! # Healing configuration.
//!
//! ## Sentinel values
//! - `liveness_interval = 0s` → clamped to 1ms (a ticker needs a period)
//! - `liveness_timeout = 0s` → the probe may take the whole interval

use std::time::Duration;

use crate::policies::BackoffPolicy;

/// Settings of a [`HealClient`](crate::HealClient).
///
/// All fields are public. Prefer the accessors over reading sentinels directly.
#[derive(Clone, Debug)]
pub struct HealConfig {
    /// Time between liveness probes of a monitored connection.
    pub liveness_interval: Duration,

    /// Deadline for a single probe. Exceeding it counts as a liveness failure.
    /// Should be shorter than `liveness_interval`.
    pub liveness_timeout: Duration,

    /// Delay curve between failed recovery attempts.
    ///
    /// Resets after every successful recovery.
    pub recovery_backoff: BackoffPolicy,
}

impl HealConfig {
    /// Effective probe period.
    #[inline]
    pub fn probe_interval(&self) -> Duration {
        self.liveness_interval.max(Duration::from_millis(1))
    }

    /// Effective probe deadline.
    #[inline]
    pub fn probe_timeout(&self) -> Duration {
        if self.liveness_timeout == Duration::ZERO {
            self.probe_interval()
        } else {
            self.liveness_timeout
        }
    }
}

impl Default for HealConfig {
    /// - `liveness_interval = 2s`
    /// - `liveness_timeout = 1s`
    /// - `recovery_backoff = BackoffPolicy::default()` (100ms doubling to 5s, equal jitter)
    fn default() -> Self {
        Self {
            liveness_interval: Duration::from_secs(2),
            liveness_timeout: Duration::from_secs(1),
            recovery_backoff: BackoffPolicy::default(),
        }
    }
}
