//! Error types surfaced by pipeline elements and the healing runtime.
//!
//! [`ChainError`] is the single error type flowing through
//! [`NetworkServiceClient`](crate::NetworkServiceClient) calls. Errors raised
//! inside a caller's own `request`/`close` are returned to that caller;
//! errors raised inside a background monitor are absorbed and only drive
//! its state machine.
//!
//! Like the rest of the crate, every variant exposes `as_label` / `as_message`
//! helpers for logs and metrics.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by pipeline calls.
///
/// Downstream failures are carried verbatim (`Remote`), the healing element
/// adds its own variants for monitor setup and superseded recoveries.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ChainError {
    /// A downstream stage or remote peer rejected the call.
    #[error("remote call failed: {message}")]
    Remote {
        /// The underlying error message.
        message: String,
    },

    /// A bounded remote call (e.g. a liveness probe) did not answer in time.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// The connection was established but its monitor could not be opened.
    ///
    /// The connection has already been closed again when this is returned.
    #[error("unable to monitor: {source}")]
    MonitorSetup {
        /// Why opening the monitor subscription failed.
        #[source]
        source: Box<ChainError>,
    },

    /// A request finished after a newer request or a close for the same
    /// connection took over; the connection it established was closed again.
    #[error("request for connection {id} superseded")]
    Superseded {
        /// Connection id whose request lost the race.
        id: String,
    },

    /// The pipeline this capability points at no longer exists.
    #[error("pipeline closed")]
    PipelineClosed,

    /// The call context was cancelled.
    #[error("context cancelled")]
    Canceled,
}

impl ChainError {
    /// Shorthand for [`ChainError::Remote`].
    pub fn remote(message: impl Into<String>) -> Self {
        ChainError::Remote {
            message: message.into(),
        }
    }

    /// Wraps `source` as a monitor setup failure.
    pub fn monitor_setup(source: ChainError) -> Self {
        ChainError::MonitorSetup {
            source: Box::new(source),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use connheal::ChainError;
    ///
    /// let err = ChainError::monitor_setup(ChainError::remote("refused"));
    /// assert_eq!(err.as_label(), "chain_monitor_setup");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ChainError::Remote { .. } => "chain_remote",
            ChainError::Timeout { .. } => "chain_timeout",
            ChainError::MonitorSetup { .. } => "chain_monitor_setup",
            ChainError::Superseded { .. } => "chain_superseded",
            ChainError::PipelineClosed => "chain_pipeline_closed",
            ChainError::Canceled => "chain_canceled",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            ChainError::Remote { message } => format!("remote: {message}"),
            ChainError::Timeout { timeout } => format!("timeout: {timeout:?}"),
            ChainError::MonitorSetup { source } => format!("monitor setup: {}", source.as_message()),
            ChainError::Superseded { id } => format!("superseded: {id}"),
            ChainError::PipelineClosed => "pipeline closed".to_string(),
            ChainError::Canceled => "context cancelled".to_string(),
        }
    }

    /// Indicates whether a recovering monitor should keep trying after this error.
    ///
    /// `Superseded`, `PipelineClosed` and `Canceled` mean the monitor has nothing
    /// left to heal; everything else is retried.
    ///
    /// # Example
    /// ```
    /// use connheal::ChainError;
    ///
    /// assert!(ChainError::remote("refused").is_retryable());
    /// assert!(!ChainError::PipelineClosed.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ChainError::Superseded { .. } | ChainError::PipelineClosed | ChainError::Canceled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monitor_setup_keeps_source() {
        let err = ChainError::monitor_setup(ChainError::Timeout {
            timeout: Duration::from_millis(50),
        });
        assert_eq!(err.to_string(), "unable to monitor: timed out after 50ms");
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("timed out after 50ms"));
    }

    #[test]
    fn terminal_errors_are_not_retryable() {
        assert!(!ChainError::Superseded { id: "c1".into() }.is_retryable());
        assert!(!ChainError::Canceled.is_retryable());
        assert!(ChainError::Timeout { timeout: Duration::from_secs(1) }.is_retryable());
    }
}
