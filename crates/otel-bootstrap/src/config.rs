//! Configuration loading and validation for the telemetry bootstrap.
//!
//! Values are read from `OTEL_`-prefixed environment variables at startup.
//! Everything has a default, so an empty environment yields a working
//! configuration that exports to `http://localhost:4318`.

use anyhow::{Context, Result};
use serde::Deserialize;

/// Validated telemetry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// Base OTLP/HTTP endpoint (`OTEL_ENDPOINT`). Signal paths are appended.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Service name reported in the resource (`OTEL_SERVICE_NAME`).
    #[serde(default)]
    pub service_name: Option<String>,

    /// Install the console log bridge and the log exporter (`OTEL_LOG_ENABLED`).
    #[serde(default)]
    pub log_enabled: bool,

    /// Tracing filter used when `RUST_LOG` is unset (`OTEL_LOG_LEVEL`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Per-export timeout applied to every OTLP exporter (`OTEL_EXPORT_TIMEOUT_SECS`).
    #[serde(default = "default_export_timeout_secs")]
    pub export_timeout_secs: u64,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_export_timeout_secs() -> u64 {
    10
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            service_name: None,
            log_enabled: false,
            log_level: default_log_level(),
            export_timeout_secs: default_export_timeout_secs(),
        }
    }
}

impl TelemetryConfig {
    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or fails validation.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::with_prefix("OTEL"))
            .build()
            .context("failed to build telemetry configuration from environment")?;

        let c: TelemetryConfig = cfg
            .try_deserialize()
            .context("failed to deserialise telemetry configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Endpoint with blank values treated as unset.
    pub fn endpoint(&self) -> Option<&str> {
        non_blank(self.endpoint.as_deref())
    }

    /// Service name with blank values treated as unset.
    pub fn service_name(&self) -> Option<&str> {
        non_blank(self.service_name.as_deref())
    }

    /// Per-export timeout as a [`std::time::Duration`].
    pub fn export_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.export_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.export_timeout_secs == 0 {
            anyhow::bail!("OTEL_EXPORT_TIMEOUT_SECS must be > 0");
        }
        if self.log_level.trim().is_empty() {
            anyhow::bail!("OTEL_LOG_LEVEL must not be empty");
        }
        Ok(())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
