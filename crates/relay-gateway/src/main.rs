//! Blob Relay CLI
//!
//! Loads layered configuration (defaults, file, `BLOB_RELAY_<SECTION>__<KEY>` environment),
//! applies command line overrides and runs the webhook server.

use anyhow::Context;
use clap::Parser;
use relay_core::config::ObservabilityConfig;
use relay_core::RelayConfig;
use relay_gateway::{serve, Relay};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{error, info};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "blob-relay")]
#[command(about = "Replicates newly created cloud storage objects as decided by a routing policy")]
#[command(version)]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "BLOB_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP listen address
    #[arg(long, env = "LISTEN")]
    listen: Option<String>,

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────
    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: json or pretty
    #[arg(long, env = "LOG_FORMAT")]
    log_format: Option<String>,

    /// Log output: stdout, stderr or a file path
    #[arg(long, env = "LOG_OUTPUT")]
    log_output: Option<String>,
}

impl Args {
    fn apply(self, config: &mut RelayConfig) {
        if let Some(listen) = self.listen {
            config.server.listen = listen;
        }
        if let Some(level) = self.log_level {
            config.observability.log_level = level;
        }
        if let Some(format) = self.log_format {
            config.observability.log_format = format;
        }
        if let Some(output) = self.log_output {
            config.observability.log_output = output;
        }
    }
}

fn init_tracing(config: &ObservabilityConfig) -> anyhow::Result<()> {
    let writer = match config.log_output.as_str() {
        "stdout" => BoxMakeWriter::new(std::io::stdout),
        "stderr" => BoxMakeWriter::new(std::io::stderr),
        path => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match config.log_format.as_str() {
        "pretty" => tracing_subscriber::registry()
            .with(fmt::layer().pretty().with_writer(writer))
            .with(filter)
            .init(),
        _ => tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(writer))
            .with(filter)
            .init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone();
    let mut config = RelayConfig::load(config_path.as_deref().and_then(|p| p.to_str()))
        .context("failed to load configuration")?;
    args.apply(&mut config);

    init_tracing(&config.observability)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen,
        policy = %config.policy.url,
        "Starting blob-relay"
    );

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e.into());
    }

    let listen = config.server.listen.clone();
    let relay = Arc::new(Relay::from_config(config)?);

    serve(relay.clone(), &listen).await?;

    info!(stats = ?relay.stats(), "blob-relay stopped");
    Ok(())
}
