//! Exporter construction.
//!
//! The [`ExporterFactory`] trait is the seam between the lifecycle controller
//! and the concrete exporters; production uses [`OtlpHttpExporters`].

use std::time::Duration;

use opentelemetry_otlp::{LogExporter, MetricExporter, Protocol, SpanExporter, WithExportConfig};
use opentelemetry_sdk::metrics::exporter::PushMetricExporter;

use crate::endpoints::Signal;
use crate::error::TelemetryError;

/// Builds one exporter per signal for a resolved endpoint URL.
pub trait ExporterFactory {
    type Span: opentelemetry_sdk::trace::SpanExporter + 'static;
    type Metric: PushMetricExporter;
    type Log: opentelemetry_sdk::logs::LogExporter + 'static;

    fn span_exporter(&self, endpoint: &str) -> Result<Self::Span, TelemetryError>;
    fn metric_exporter(&self, endpoint: &str) -> Result<Self::Metric, TelemetryError>;
    fn log_exporter(&self, endpoint: &str) -> Result<Self::Log, TelemetryError>;
}

/// OTLP over HTTP with binary protobuf bodies.
#[derive(Debug, Clone)]
pub struct OtlpHttpExporters {
    timeout: Duration,
}

impl OtlpHttpExporters {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ExporterFactory for OtlpHttpExporters {
    type Span = SpanExporter;
    type Metric = MetricExporter;
    type Log = LogExporter;

    fn span_exporter(&self, endpoint: &str) -> Result<SpanExporter, TelemetryError> {
        check_scheme(Signal::Traces, endpoint)?;
        SpanExporter::builder()
            .with_http()
            .with_protocol(Protocol::HttpBinary)
            .with_endpoint(endpoint)
            .with_timeout(self.timeout)
            .build()
            .map_err(|e| TelemetryError::exporter(Signal::Traces, e))
    }

    fn metric_exporter(&self, endpoint: &str) -> Result<MetricExporter, TelemetryError> {
        check_scheme(Signal::Metrics, endpoint)?;
        MetricExporter::builder()
            .with_http()
            .with_protocol(Protocol::HttpBinary)
            .with_endpoint(endpoint)
            .with_timeout(self.timeout)
            .build()
            .map_err(|e| TelemetryError::exporter(Signal::Metrics, e))
    }

    fn log_exporter(&self, endpoint: &str) -> Result<LogExporter, TelemetryError> {
        check_scheme(Signal::Logs, endpoint)?;
        LogExporter::builder()
            .with_http()
            .with_protocol(Protocol::HttpBinary)
            .with_endpoint(endpoint)
            .with_timeout(self.timeout)
            .build()
            .map_err(|e| TelemetryError::exporter(Signal::Logs, e))
    }
}

/// OTLP/HTTP only speaks `http` and `https`.
fn check_scheme(signal: Signal, endpoint: &str) -> Result<(), TelemetryError> {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        Ok(())
    } else {
        Err(TelemetryError::exporter(
            signal,
            format!("endpoint `{endpoint}` must use the http or https scheme"),
        ))
    }
}
