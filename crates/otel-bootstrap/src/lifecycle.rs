//! Telemetry lifecycle: pipeline assembly, start-up and graceful shutdown.
//!
//! ```text
//! Unstarted ──start──▶ Starting ──ok──▶ Running ──shutdown──▶ ShuttingDown ──▶ Stopped
//!                          │
//!                          └──error──▶ Failed
//! ```
//!
//! One pipeline may run per process. [`Telemetry::start`] claims it and
//! [`Telemetry::shutdown`] (or a failed start) releases it.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use opentelemetry::logs::{AnyValue, LogRecord, Logger, LoggerProvider as _, Severity};
use opentelemetry_sdk::error::OTelSdkResult;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};
use opentelemetry_sdk::trace::SdkTracerProvider;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::TelemetryConfig;
use crate::console::{self, OtelLogEmitter};
use crate::endpoints::{ExporterEndpoints, Signal, DEFAULT_BASE_ENDPOINT};
use crate::error::{ShutdownFailure, TelemetryError};
use crate::exporters::{ExporterFactory, OtlpHttpExporters};
use crate::instrumentation::{AutoInstrumentations, Instrumentation};
use crate::resource::ResourceDescriptor;
use crate::{console_error, console_info};

/// Interval between periodic metric exports.
pub const METRIC_EXPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Upper bound on draining every provider during shutdown.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

static PIPELINE_CLAIMED: AtomicBool = AtomicBool::new(false);

/// Position of a [`Telemetry`] controller in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unstarted,
    Starting,
    Running,
    ShuttingDown,
    Stopped,
    Failed,
}

impl LifecycleState {
    /// `Stopped` and `Failed` are never left.
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Stopped | LifecycleState::Failed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleState::Unstarted => "unstarted",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::ShuttingDown => "shutting down",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Failed => "failed",
        })
    }
}

/// The assembled providers. Owned by the controller between start and shutdown.
#[derive(Debug)]
pub struct PipelineHandle {
    resource: Arc<ResourceDescriptor>,
    endpoints: ExporterEndpoints,
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
    logger_provider: Option<SdkLoggerProvider>,
    log_export_open: Arc<AtomicBool>,
}

impl PipelineHandle {
    /// Build every exporter, then the providers around them.
    ///
    /// The log exporter is only constructed when `config.log_enabled`.
    pub fn assemble<F: ExporterFactory>(
        config: &TelemetryConfig,
        factory: &F,
    ) -> Result<Self, TelemetryError> {
        let resource = Arc::new(ResourceDescriptor::build(config));
        let endpoints = ExporterEndpoints::resolve(config.endpoint());

        let span_exporter = factory.span_exporter(&endpoints.traces)?;
        let metric_exporter = factory.metric_exporter(&endpoints.metrics)?;
        let log_exporter = if config.log_enabled {
            Some(factory.log_exporter(&endpoints.logs)?)
        } else {
            None
        };

        let otel_resource = resource.to_resource();

        let tracer_provider = SdkTracerProvider::builder()
            .with_batch_exporter(span_exporter)
            .with_resource(otel_resource.clone())
            .build();

        let reader = PeriodicReader::builder(metric_exporter)
            .with_interval(METRIC_EXPORT_INTERVAL)
            .build();
        let meter_provider = SdkMeterProvider::builder()
            .with_reader(reader)
            .with_resource(otel_resource.clone())
            .build();

        let logger_provider = log_exporter.map(|exporter| {
            SdkLoggerProvider::builder()
                .with_batch_exporter(exporter)
                .with_resource(otel_resource)
                .build()
        });

        Ok(Self {
            resource,
            endpoints,
            tracer_provider,
            meter_provider,
            logger_provider,
            log_export_open: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Providers without exporters, for exercising instrumentations.
    #[cfg(test)]
    pub(crate) fn bare(config: &TelemetryConfig) -> Self {
        Self {
            resource: Arc::new(ResourceDescriptor::build(config)),
            endpoints: ExporterEndpoints::resolve(config.endpoint()),
            tracer_provider: SdkTracerProvider::builder().build(),
            meter_provider: SdkMeterProvider::builder().build(),
            logger_provider: None,
            log_export_open: Arc::new(AtomicBool::new(true)),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_logger_provider(mut self, provider: SdkLoggerProvider) -> Self {
        self.logger_provider = Some(provider);
        self
    }

    pub fn resource(&self) -> &Arc<ResourceDescriptor> {
        &self.resource
    }

    pub fn endpoints(&self) -> &ExporterEndpoints {
        &self.endpoints
    }

    pub fn tracer_provider(&self) -> &SdkTracerProvider {
        &self.tracer_provider
    }

    pub fn meter_provider(&self) -> &SdkMeterProvider {
        &self.meter_provider
    }

    /// `None` unless log export is enabled.
    pub fn logger_provider(&self) -> Option<&SdkLoggerProvider> {
        self.logger_provider.as_ref()
    }

    /// Flag consulted by layers that feed the logger provider; `false` once
    /// the pipeline has started draining.
    pub fn log_export_gate(&self) -> Arc<AtomicBool> {
        self.log_export_open.clone()
    }

    /// Stop feeding the logger provider. Events recorded afterwards are only
    /// written locally.
    pub fn close_log_export(&self) {
        self.log_export_open.store(false, Ordering::Release);
    }

    /// Export everything buffered so far. Blocks until the exporters return.
    pub fn force_flush(&self) -> Result<(), TelemetryError> {
        self.each_provider(
            SdkTracerProvider::force_flush,
            SdkMeterProvider::force_flush,
            SdkLoggerProvider::force_flush,
        )
    }

    /// Flush and stop every provider. Blocks until the exporters return.
    pub fn shutdown(&self) -> Result<(), TelemetryError> {
        self.each_provider(
            SdkTracerProvider::shutdown,
            SdkMeterProvider::shutdown,
            SdkLoggerProvider::shutdown,
        )
    }

    fn each_provider(
        &self,
        traces: impl FnOnce(&SdkTracerProvider) -> OTelSdkResult,
        metrics: impl FnOnce(&SdkMeterProvider) -> OTelSdkResult,
        logs: impl FnOnce(&SdkLoggerProvider) -> OTelSdkResult,
    ) -> Result<(), TelemetryError> {
        let mut failures = Vec::new();
        let mut record = |signal: Signal, result: OTelSdkResult| {
            if let Err(error) = result {
                failures.push(ShutdownFailure { signal, error });
            }
        };

        record(Signal::Traces, traces(&self.tracer_provider));
        record(Signal::Metrics, metrics(&self.meter_provider));
        if let Some(provider) = &self.logger_provider {
            record(Signal::Logs, logs(provider));
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TelemetryError::Shutdown(failures))
        }
    }
}

type Assembler =
    Box<dyn Fn(&TelemetryConfig) -> Result<PipelineHandle, TelemetryError> + Send + Sync>;

/// Builder for [`Telemetry`].
pub struct TelemetryBuilder {
    config: TelemetryConfig,
    assembler: Option<Assembler>,
    instrumentations: Option<Vec<Box<dyn Instrumentation>>>,
}

impl TelemetryBuilder {
    /// Replace the OTLP/HTTP exporters.
    pub fn exporters<F>(mut self, factory: F) -> Self
    where
        F: ExporterFactory + Send + Sync + 'static,
    {
        let assembler: Assembler = Box::new(move |config: &TelemetryConfig| {
            PipelineHandle::assemble(config, &factory)
        });
        self.assembler = Some(assembler);
        self
    }

    /// Replace the default [`AutoInstrumentations`] set.
    pub fn instrumentations(mut self, instrumentations: Vec<Box<dyn Instrumentation>>) -> Self {
        self.instrumentations = Some(instrumentations);
        self
    }

    pub fn build(self) -> Telemetry {
        let TelemetryBuilder {
            config,
            assembler,
            instrumentations,
        } = self;

        let assembler: Assembler = match assembler {
            Some(assembler) => assembler,
            None => {
                let factory = OtlpHttpExporters::new(config.export_timeout());
                Box::new(move |config: &TelemetryConfig| {
                    PipelineHandle::assemble(config, &factory)
                })
            }
        };
        let instrumentations =
            instrumentations.unwrap_or_else(|| AutoInstrumentations::all(&config));
        let (state, _) = watch::channel(LifecycleState::Unstarted);

        Telemetry {
            config,
            assembler,
            instrumentations,
            state,
            pipeline: Mutex::new(None),
        }
    }
}

/// Lifecycle controller for the process-wide telemetry pipeline.
///
/// `start` and `shutdown` are the only operations that mutate the pipeline.
pub struct Telemetry {
    config: TelemetryConfig,
    assembler: Assembler,
    instrumentations: Vec<Box<dyn Instrumentation>>,
    state: watch::Sender<LifecycleState>,
    pipeline: Mutex<Option<PipelineHandle>>,
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Telemetry {
    pub fn builder(config: TelemetryConfig) -> TelemetryBuilder {
        TelemetryBuilder {
            config,
            assembler: None,
            instrumentations: None,
        }
    }

    /// Controller with the default exporters and instrumentations, configured
    /// from the environment.
    ///
    /// # Errors
    ///
    /// Returns [`TelemetryError::Config`] if the environment is invalid.
    pub fn from_env() -> Result<Self, TelemetryError> {
        Ok(Self::builder(TelemetryConfig::from_env()?).build())
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Wait until the controller reaches `Stopped` or `Failed`.
    ///
    /// Never resolves for a controller that is not started.
    pub async fn wait_stopped(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|state| state.is_terminal()).await;
    }

    /// Assemble the pipeline and install it process-wide.
    ///
    /// On success the global tracer and meter providers point at the new
    /// pipeline, every instrumentation is registered and, when log export is
    /// enabled, the console log bridge is installed. On failure the
    /// controller is `Failed`, the error is written to the error console and
    /// nothing is left installed by the controller itself.
    ///
    /// # Errors
    ///
    /// [`TelemetryError::InvalidState`] if called twice,
    /// [`TelemetryError::AlreadyRunning`] if another controller holds the
    /// pipeline, or any exporter / instrumentation fault.
    pub fn start(&self) -> Result<(), TelemetryError> {
        let claimed = self.state.send_if_modified(|state| {
            if *state == LifecycleState::Unstarted {
                *state = LifecycleState::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(TelemetryError::InvalidState {
                operation: "start",
                state: self.state(),
            });
        }

        match self.install() {
            Ok(()) => {
                self.state.send_replace(LifecycleState::Running);
                console_info!("OpenTelemetry started");
                info!(
                    service = self.config.service_name().unwrap_or_default(),
                    log_enabled = self.config.log_enabled,
                    "telemetry pipeline running"
                );
                Ok(())
            }
            Err(e) => {
                self.state.send_replace(LifecycleState::Failed);
                console_error!("OpenTelemetry failed to start:", e);
                error!(error = %e, "telemetry start-up failed");
                Err(e)
            }
        }
    }

    /// [`start`](Self::start), exiting the process with status 1 on failure.
    pub fn start_or_exit(&self) {
        if self.start().is_err() {
            std::process::exit(1);
        }
    }

    fn install(&self) -> Result<(), TelemetryError> {
        if PIPELINE_CLAIMED.swap(true, Ordering::AcqRel) {
            return Err(TelemetryError::AlreadyRunning);
        }

        self.print_banner();
        let result = self.assemble_and_register();
        if result.is_err() {
            PIPELINE_CLAIMED.store(false, Ordering::Release);
        }
        result
    }

    fn assemble_and_register(&self) -> Result<(), TelemetryError> {
        let pipeline = (self.assembler)(&self.config)?;

        for instrumentation in &self.instrumentations {
            instrumentation.register(&pipeline)?;
            debug!(instrumentation = instrumentation.name(), "instrumentation registered");
        }

        opentelemetry::global::set_tracer_provider(pipeline.tracer_provider.clone());
        opentelemetry::global::set_meter_provider(pipeline.meter_provider.clone());

        if let Some(provider) = &pipeline.logger_provider {
            emit_greeting(provider);
            console::install(OtelLogEmitter::new(provider.logger("console")));
        }

        *self.lock_pipeline() = Some(pipeline);
        Ok(())
    }

    /// Drain and stop the pipeline.
    ///
    /// At most one caller performs the work; a concurrent caller waits for it
    /// to finish. Calling on a controller that never reached `Running` does
    /// nothing. Failures are reported and swallowed.
    pub async fn shutdown(&self) {
        let owner = self.state.send_if_modified(|state| {
            if *state == LifecycleState::Running {
                *state = LifecycleState::ShuttingDown;
                true
            } else {
                false
            }
        });
        if !owner {
            match self.state() {
                LifecycleState::ShuttingDown => {
                    debug!("telemetry shutdown already in progress");
                    self.wait_stopped().await;
                }
                state => debug!(%state, "telemetry shutdown ignored"),
            }
            return;
        }

        console::uninstall();
        let pipeline = self.lock_pipeline().take();

        if let Some(pipeline) = pipeline {
            pipeline.close_log_export();
            match drain(pipeline).await {
                Ok(()) => {
                    console_info!("OpenTelemetry gracefully shutdown");
                    info!("telemetry pipeline stopped");
                }
                Err(e) => {
                    console_error!("OpenTelemetry shutdown failed:", e);
                    warn!(error = %e, "telemetry shutdown incomplete");
                }
            }
        }

        PIPELINE_CLAIMED.store(false, Ordering::Release);
        self.state.send_replace(LifecycleState::Stopped);
    }

    /// Export everything buffered so far without stopping the pipeline.
    ///
    /// Blocks the calling thread until every exporter returns.
    ///
    /// # Errors
    ///
    /// [`TelemetryError::InvalidState`] when not running, or the providers'
    /// flush failures.
    pub fn force_flush(&self) -> Result<(), TelemetryError> {
        let pipeline = self.lock_pipeline();
        match pipeline.as_ref() {
            Some(pipeline) => pipeline.force_flush(),
            None => Err(TelemetryError::InvalidState {
                operation: "flush",
                state: self.state(),
            }),
        }
    }

    /// Spawn a task that runs [`shutdown`](Self::shutdown) on every SIGTERM
    /// (Ctrl-C on non-Unix targets).
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the signal handler cannot be registered.
    pub fn shutdown_on_termination(self: Arc<Self>) -> io::Result<JoinHandle<()>> {
        let mut termination = Termination::register()?;
        Ok(tokio::spawn(async move {
            while termination.recv().await {
                info!("termination signal received");
                self.shutdown().await;
            }
        }))
    }

    fn lock_pipeline(&self) -> MutexGuard<'_, Option<PipelineHandle>> {
        self.pipeline.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn print_banner(&self) {
        console_info!("OpenTelemetry configuration");
        console_info!(
            "Endpoint:",
            self.config.endpoint().unwrap_or(DEFAULT_BASE_ENDPOINT)
        );
        console_info!(
            "Service name:",
            self.config
                .service_name()
                .unwrap_or(crate::resource::DEFAULT_SERVICE_NAME)
        );
        console_info!("Log enabled:", self.config.log_enabled);
        console_info!();
        console_info!("OpenTelemetry starting");
    }
}

/// First record on a fresh log pipeline.
fn emit_greeting(provider: &SdkLoggerProvider) {
    let logger = provider.logger("default");
    let mut record = logger.create_log_record();
    record.set_severity_number(Severity::Info);
    record.set_severity_text("INFO");
    record.set_body(AnyValue::from("Hello OpenTelemetry"));
    record.add_attribute("logs.type", "LogRecord");
    logger.emit(record);
}

/// Run the blocking provider shutdown off the async workers, bounded by
/// [`SHUTDOWN_TIMEOUT`].
async fn drain(pipeline: PipelineHandle) -> Result<(), TelemetryError> {
    let task = tokio::task::spawn_blocking(move || pipeline.shutdown());
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(TelemetryError::ShutdownTask(join_error)),
        Err(_) => Err(TelemetryError::ShutdownTimedOut(SHUTDOWN_TIMEOUT)),
    }
}

#[cfg(unix)]
struct Termination(tokio::signal::unix::Signal);

#[cfg(unix)]
impl Termination {
    fn register() -> io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self(signal(SignalKind::terminate())?))
    }

    async fn recv(&mut self) -> bool {
        self.0.recv().await.is_some()
    }
}

#[cfg(not(unix))]
struct Termination;

#[cfg(not(unix))]
impl Termination {
    fn register() -> io::Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> bool {
        tokio::signal::ctrl_c().await.is_ok()
    }
}
