//! Instrumentations wired into the pipeline at start-up.
//!
//! Each [`Instrumentation`] gets one chance to hook itself onto the freshly
//! assembled [`PipelineHandle`]. The default set returned by
//! [`AutoInstrumentations::all`] collects everything the process makes
//! observable through the `tracing` ecosystem:
//!
//! - W3C `traceparent` and `baggage` propagation;
//! - a global `tracing` subscriber exporting spans (and events, when log
//!   export is enabled) through OpenTelemetry, with JSON output on stdout.
//!
//! Libraries instrumented with `tracing` (or the `log` facade) need no
//! further wiring.

use std::sync::atomic::Ordering;

use opentelemetry::propagation::TextMapCompositePropagator;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use tracing::Subscriber;
use tracing_subscriber::filter::{filter_fn, FilterExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::TelemetryConfig;
use crate::error::TelemetryError;
use crate::lifecycle::PipelineHandle;

/// Crates whose events must not be exported as logs: they sit on the export
/// path itself.
const EXPORT_PATH_TARGETS: [&str; 5] = ["opentelemetry", "hyper", "reqwest", "h2", "tonic"];

/// An opaque capability registered into the pipeline during start-up.
#[cfg_attr(test, mockall::automock)]
pub trait Instrumentation: Send + Sync {
    fn name(&self) -> &'static str;

    /// Hook into `pipeline`. An error aborts start-up.
    fn register(&self, pipeline: &PipelineHandle) -> Result<(), TelemetryError>;
}

/// The "collect everything observable" instrumentation set.
pub struct AutoInstrumentations;

impl AutoInstrumentations {
    pub fn all(config: &TelemetryConfig) -> Vec<Box<dyn Instrumentation>> {
        vec![
            Box::new(PropagatorInstrumentation),
            Box::new(TracingInstrumentation::new(config.log_level.clone())),
        ]
    }
}

/// Installs the global W3C trace-context + baggage text map propagator.
#[derive(Debug, Default)]
pub struct PropagatorInstrumentation;

impl Instrumentation for PropagatorInstrumentation {
    fn name(&self) -> &'static str {
        "propagators"
    }

    fn register(&self, _pipeline: &PipelineHandle) -> Result<(), TelemetryError> {
        opentelemetry::global::set_text_map_propagator(TextMapCompositePropagator::new(vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ]));
        Ok(())
    }
}

/// Installs the global `tracing` subscriber bound to the pipeline.
#[derive(Debug)]
pub struct TracingInstrumentation {
    log_level: String,
}

impl TracingInstrumentation {
    pub fn new(log_level: impl Into<String>) -> Self {
        Self {
            log_level: log_level.into(),
        }
    }

    fn fail(&self, reason: impl ToString) -> TelemetryError {
        TelemetryError::Instrumentation {
            name: self.name(),
            reason: reason.to_string(),
        }
    }

    /// Filter for the log export layer: the configured level with the
    /// export path silenced.
    fn export_filter(&self) -> Result<EnvFilter, TelemetryError> {
        let mut directives = self.log_level.clone();
        for target in EXPORT_PATH_TARGETS {
            directives.push_str(&format!(",{target}=off"));
        }
        EnvFilter::try_new(directives).map_err(|e| self.fail(e))
    }

    /// Bridge from `tracing` events to the pipeline's logger provider.
    ///
    /// `None` when log export is disabled. The layer goes quiet once the
    /// pipeline closes its log export gate.
    fn log_export_layer<S>(
        &self,
        pipeline: &PipelineHandle,
    ) -> Result<Option<Box<dyn Layer<S> + Send + Sync>>, TelemetryError>
    where
        S: Subscriber + for<'a> LookupSpan<'a> + 'static,
    {
        let Some(provider) = pipeline.logger_provider() else {
            return Ok(None);
        };
        let gate = pipeline.log_export_gate();
        let open = filter_fn(move |_| gate.load(Ordering::Acquire));
        let filter = self.export_filter()?.and(open);
        Ok(Some(
            OpenTelemetryTracingBridge::new(provider)
                .with_filter(filter)
                .boxed(),
        ))
    }
}

impl Instrumentation for TracingInstrumentation {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn register(&self, pipeline: &PipelineHandle) -> Result<(), TelemetryError> {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(&self.log_level).map_err(|e| self.fail(e))?,
        };

        let tracer = pipeline.tracer_provider().tracer("otel-bootstrap");
        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

        let log_layer = self.log_export_layer(pipeline)?;

        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .with(otel_layer)
            .with(log_layer)
            .try_init()
            .map_err(|e| self.fail(e))
    }
}
