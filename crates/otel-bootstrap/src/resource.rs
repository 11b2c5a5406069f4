//! Service identity attached to every exported span, metric and log record.

use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, SERVICE_VERSION};

use crate::config::TelemetryConfig;

/// Service name reported when none is configured.
pub const DEFAULT_SERVICE_NAME: &str = "unknown-app";

/// Service version reported by every process. Not configurable.
pub const SERVICE_VERSION_VALUE: &str = "1.0";

/// Immutable identity record for the process.
///
/// Built once at startup and shared by reference with every provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDescriptor {
    service_name: String,
    service_version: &'static str,
}

impl ResourceDescriptor {
    /// Build the descriptor from configuration, defaulting the service name.
    pub fn build(config: &TelemetryConfig) -> Self {
        Self {
            service_name: config
                .service_name()
                .unwrap_or(DEFAULT_SERVICE_NAME)
                .to_owned(),
            service_version: SERVICE_VERSION_VALUE,
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn service_version(&self) -> &'static str {
        self.service_version
    }

    /// Convert into the SDK [`Resource`] handed to every provider.
    pub fn to_resource(&self) -> Resource {
        Resource::builder_empty()
            .with_attributes([
                KeyValue::new(SERVICE_NAME, self.service_name.clone()),
                KeyValue::new(SERVICE_VERSION, self.service_version),
            ])
            .build()
    }
}
