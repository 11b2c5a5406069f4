//! Process-wide OpenTelemetry bootstrap.
//!
//! [`Telemetry`] assembles OTLP/HTTP exporters for traces, metrics and logs
//! around one [`ResourceDescriptor`], registers the auto-instrumentations and,
//! when log export is enabled, bridges the [`console`] channels into
//! structured log records. A SIGTERM drains and stops everything.
//!
//! ```no_run
//! use std::sync::Arc;
//! use otel_bootstrap::{console_info, Telemetry, TelemetryConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let telemetry = Arc::new(Telemetry::builder(TelemetryConfig::from_env()?).build());
//! telemetry.start_or_exit();
//! telemetry.clone().shutdown_on_termination()?;
//!
//! console_info!("Server is running on port", 8080);
//! telemetry.wait_stopped().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod console;
pub mod endpoints;
pub mod error;
pub mod exporters;
pub mod instrumentation;
pub mod lifecycle;
pub mod resource;

pub use config::TelemetryConfig;
pub use console::{Channel, ChannelBindings, ConsoleSink};
pub use endpoints::{ExporterEndpoints, Signal};
pub use error::TelemetryError;
pub use exporters::{ExporterFactory, OtlpHttpExporters};
pub use instrumentation::{AutoInstrumentations, Instrumentation};
pub use lifecycle::{LifecycleState, PipelineHandle, Telemetry, TelemetryBuilder};
pub use resource::ResourceDescriptor;
