//! OTLP/HTTP endpoint resolution.
//!
//! Resolution only computes strings; no connection is opened here.

use std::fmt;

/// Base endpoint used when none is configured.
pub const DEFAULT_BASE_ENDPOINT: &str = "http://localhost:4318";

/// The three telemetry signals exported by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Traces,
    Metrics,
    Logs,
}

impl Signal {
    pub const ALL: [Signal; 3] = [Signal::Traces, Signal::Metrics, Signal::Logs];

    /// OTLP/HTTP path for this signal.
    pub fn path(self) -> &'static str {
        match self {
            Signal::Traces => "/v1/traces",
            Signal::Metrics => "/v1/metrics",
            Signal::Logs => "/v1/logs",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Signal::Traces => "traces",
            Signal::Metrics => "metrics",
            Signal::Logs => "logs",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully-qualified export URL per signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExporterEndpoints {
    pub traces: String,
    pub metrics: String,
    pub logs: String,
}

impl ExporterEndpoints {
    /// Append each signal path to `base`, or to [`DEFAULT_BASE_ENDPOINT`]
    /// when `base` is absent or blank.
    pub fn resolve(base: Option<&str>) -> Self {
        let base = base
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(|b| b.strip_suffix('/').unwrap_or(b))
            .unwrap_or(DEFAULT_BASE_ENDPOINT);

        let url = |signal: Signal| format!("{base}{}", signal.path());
        Self {
            traces: url(Signal::Traces),
            metrics: url(Signal::Metrics),
            logs: url(Signal::Logs),
        }
    }

    pub fn get(&self, signal: Signal) -> &str {
        match signal {
            Signal::Traces => &self.traces,
            Signal::Metrics => &self.metrics,
            Signal::Logs => &self.logs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_localhost() {
        let e = ExporterEndpoints::resolve(None);
        assert_eq!(e.traces, "http://localhost:4318/v1/traces");
        assert_eq!(e.metrics, "http://localhost:4318/v1/metrics");
        assert_eq!(e.logs, "http://localhost:4318/v1/logs");
    }

    #[test]
    fn appends_paths_to_base() {
        let e = ExporterEndpoints::resolve(Some("http://collector:4318"));
        assert_eq!(e.traces, "http://collector:4318/v1/traces");
        assert_eq!(e.metrics, "http://collector:4318/v1/metrics");
        assert_eq!(e.logs, "http://collector:4318/v1/logs");
    }

    #[test]
    fn blank_base_uses_default() {
        assert_eq!(
            ExporterEndpoints::resolve(Some("  ")),
            ExporterEndpoints::resolve(None)
        );
    }

    #[test]
    fn trailing_slash_is_dropped() {
        let e = ExporterEndpoints::resolve(Some("https://otel.example.com/"));
        assert_eq!(e.logs, "https://otel.example.com/v1/logs");
    }

    #[test]
    fn resolution_is_idempotent() {
        let a = ExporterEndpoints::resolve(Some("http://collector:4318"));
        let b = ExporterEndpoints::resolve(Some("http://collector:4318"));
        assert_eq!(a, b);
        for signal in Signal::ALL {
            assert!(a.get(signal).ends_with(signal.path()));
        }
    }
}
