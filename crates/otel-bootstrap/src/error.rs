//! Error types for the telemetry bootstrap.

use std::fmt;

use opentelemetry_sdk::error::OTelSdkError;
use thiserror::Error;

use crate::endpoints::Signal;
use crate::lifecycle::LifecycleState;

/// Top-level telemetry error type.
///
/// Variants fall into the three fault classes the lifecycle distinguishes:
/// - startup assembly faults ([`TelemetryError::Exporter`],
///   [`TelemetryError::Instrumentation`], [`TelemetryError::AlreadyRunning`],
///   [`TelemetryError::Config`]) are fatal to the process;
/// - shutdown faults ([`TelemetryError::Shutdown`],
///   [`TelemetryError::ShutdownTimedOut`]) are reported and swallowed;
/// - [`TelemetryError::InvalidState`] signals a lifecycle call made out of order.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// An OTLP exporter could not be constructed.
    #[error("failed to build {signal} exporter: {source}")]
    Exporter {
        signal: Signal,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An instrumentation refused to register.
    #[error("instrumentation `{name}` failed to register: {reason}")]
    Instrumentation { name: &'static str, reason: String },

    /// Another pipeline is already running in this process.
    #[error("a telemetry pipeline is already running in this process")]
    AlreadyRunning,

    /// The requested transition is not valid from the current state.
    #[error("cannot {operation} telemetry while {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },

    /// One or more providers failed to flush or shut down.
    #[error("telemetry shutdown failed: {}", ShutdownFailures(.0))]
    Shutdown(Vec<ShutdownFailure>),

    /// Providers did not finish draining within the shutdown timeout.
    #[error("telemetry shutdown timed out after {0:?}")]
    ShutdownTimedOut(std::time::Duration),

    /// The blocking shutdown task panicked or was cancelled.
    #[error("telemetry shutdown task failed: {0}")]
    ShutdownTask(#[from] tokio::task::JoinError),

    /// Configuration could not be loaded or failed validation.
    #[error("invalid telemetry configuration: {0}")]
    Config(#[from] anyhow::Error),
}

impl TelemetryError {
    /// Wrap an exporter construction error for `signal`.
    pub fn exporter(
        signal: Signal,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        TelemetryError::Exporter {
            signal,
            source: source.into(),
        }
    }

    /// Returns `true` for faults that must stop the process during start-up.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            TelemetryError::Shutdown(_)
                | TelemetryError::ShutdownTimedOut(_)
                | TelemetryError::ShutdownTask(_)
        )
    }
}

/// A single provider that failed during flush or shutdown.
#[derive(Debug)]
pub struct ShutdownFailure {
    pub signal: Signal,
    pub error: OTelSdkError,
}

struct ShutdownFailures<'a>(&'a [ShutdownFailure]);

impl fmt::Display for ShutdownFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", failure.signal, failure.error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_faults_are_not_fatal() {
        assert!(!TelemetryError::ShutdownTimedOut(std::time::Duration::from_secs(1)).is_fatal());
        assert!(!TelemetryError::Shutdown(vec![]).is_fatal());
        assert!(TelemetryError::AlreadyRunning.is_fatal());
        assert!(TelemetryError::exporter(Signal::Traces, "boom").is_fatal());
    }

    #[test]
    fn display_lists_every_failed_signal() {
        let e = TelemetryError::Shutdown(vec![
            ShutdownFailure {
                signal: Signal::Traces,
                error: OTelSdkError::AlreadyShutdown,
            },
            ShutdownFailure {
                signal: Signal::Logs,
                error: OTelSdkError::InternalFailure("exporter gone".into()),
            },
        ]);
        let msg = e.to_string();
        assert!(msg.contains("traces"));
        assert!(msg.contains("logs"));
        assert!(msg.contains("exporter gone"));
    }

    #[test]
    fn exporter_display_includes_signal() {
        let e = TelemetryError::exporter(Signal::Metrics, "connection refused");
        assert_eq!(
            e.to_string(),
            "failed to build metrics exporter: connection refused"
        );
    }
}
