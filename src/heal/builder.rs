use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::chain::NetworkServiceClient;
use crate::policies::BackoffPolicy;

use super::{
    client::HealClient,
    config::HealConfig,
    liveness::{LivenessCheck, PingCheck},
    registry::MonitorRegistry,
};

/// Builder for a [`HealClient`].
pub struct HealBuilder {
    chain_token: CancellationToken,
    pipeline: Arc<dyn NetworkServiceClient>,
    liveness: Arc<dyn LivenessCheck>,
    cfg: HealConfig,
}

impl HealBuilder {
    /// Starts a builder.
    ///
    /// - `chain_token` bounds every monitor this element starts; cancel it to
    ///   shut all of them down.
    /// - `pipeline` is the full pipeline the element sits in, used to re-issue
    ///   close/request during recovery (usually a [`ChainRef`](crate::ChainRef)).
    pub fn new(chain_token: CancellationToken, pipeline: Arc<dyn NetworkServiceClient>) -> Self {
        Self {
            chain_token,
            pipeline,
            liveness: Arc::new(PingCheck),
            cfg: HealConfig::default(),
        }
    }

    /// Replaces the whole configuration.
    pub fn with_config(mut self, cfg: HealConfig) -> Self {
        self.cfg = cfg;
        self
    }

    /// Replaces the default [`PingCheck`].
    pub fn with_liveness_check(mut self, check: Arc<dyn LivenessCheck>) -> Self {
        self.liveness = check;
        self
    }

    /// Sets the time between liveness probes.
    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.cfg.liveness_interval = interval;
        self
    }

    /// Sets the deadline of a single probe (`0` = the whole interval).
    pub fn with_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.cfg.liveness_timeout = timeout;
        self
    }

    /// Sets the delay curve between failed recovery attempts.
    pub fn with_recovery_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.cfg.recovery_backoff = backoff;
        self
    }

    /// Builds the element.
    pub fn build(self) -> Arc<HealClient> {
        Arc::new(HealClient::new_internal(
            self.chain_token,
            self.pipeline,
            self.liveness,
            self.cfg,
            MonitorRegistry::new(),
        ))
    }
}
