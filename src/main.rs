//! AWS Lambda OTLP trace forwarder extension binary.
//!
//! Buffers OTLP trace spans sent by the function to the local receiver and
//! forwards them as a single batch per lifecycle event, before the execution
//! environment freezes or terminates.
//!
//! # Configuration
//!
//! Configuration is loaded from (in order of priority):
//! 1. Default values
//! 2. Config file: `/var/task/otel-forwarder.toml`
//! 3. `OTEL_EXPORTER_OTLP_ENDPOINT` / `OTEL_EXPORTER_OTLP_HEADERS` /
//!    `AWS_LAMBDA_RUNTIME_API`
//! 4. Environment variables with the `FORWARDER_` prefix
//!
//! See the crate documentation for the full configuration surface.

use anyhow::{Context, Result};
use clap::Parser;
use lambda_otel_forwarder::{Config, ExtensionRuntime};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "lambda-otel-forwarder", version, about)]
struct Args {
    /// Do not register with the Extensions API; run the receiver and block
    /// until a termination signal.
    #[arg(long)]
    local_mode: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing().context("failed to initialise tracing subscriber")?;

    let args = Args::parse();

    let mut config = Config::load().context("failed to load configuration")?;
    if args.local_mode {
        config.lifecycle.local_mode = true;
    }
    tracing::debug!(?config, "configuration loaded");

    ExtensionRuntime::new(config)
        .run()
        .await
        .context("extension runtime failed")?;

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lambda_otel_forwarder=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).without_time())
        .with(filter)
        .try_init()
        .context("failed to initialise tracing registry")?;

    Ok(())
}
