//! `otel-demo` — host binary for the telemetry bootstrap.
//!
//! Startup sequence:
//! 1. Apply `.env`, then load and validate configuration from the environment.
//! 2. Start the telemetry pipeline; a start-up fault exits with status 1.
//! 3. Write the demo console output through the (possibly bridged) channels.
//! 4. Wait for SIGTERM, then drain and stop the pipeline.

use std::sync::Arc;

use anyhow::{Context, Result};
use otel_bootstrap::{console_error, console_info, console_warn, Telemetry};

fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    dotenvy::dotenv().ok();
    let telemetry = Telemetry::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e}");
        e
    })?;
    let telemetry = Arc::new(telemetry);

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    // The blocking HTTP exporters are built before any async runtime exists.
    telemetry.start_or_exit();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(run(telemetry))
}

async fn run(telemetry: Arc<Telemetry>) -> Result<()> {
    let _signals = telemetry
        .clone()
        .shutdown_on_termination()
        .context("failed to register termination signal handler")?;

    // -----------------------------------------------------------------------
    // 3. Demo output
    // -----------------------------------------------------------------------
    greet();

    // -----------------------------------------------------------------------
    // 4. Wait for SIGTERM
    // -----------------------------------------------------------------------
    telemetry.wait_stopped().await;
    Ok(())
}

#[tracing::instrument]
fn greet() {
    console_info!("Hello World!");
    console_warn!("This is a warning!");
    console_error!("This is an error!");
}
