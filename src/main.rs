//! relay - byte-stream relay
//!
//! # Usage
//!
//! ```bash
//! relay                          # reads ./config.json
//! relay --config /etc/relay.json
//! relay --log-level debug
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use relay_rs::server::{LogConfig, LogFormat};
use relay_rs::{Relay, RelayDocument};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Runtime-configurable byte-stream relay
#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the JSON startup document
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the document
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let doc = RelayDocument::load(&cli.config);
    let log = doc.as_ref().map(|d| d.log.clone()).unwrap_or_default();
    init_logging(cli.log_level.as_deref(), &log)?;

    let doc = doc.with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!(config = %cli.config.display(), "Starting relay");

    let relay = Relay::from_document(doc).context("invalid relay configuration")?;

    relay
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!("Relay stopped");
    Ok(())
}

/// Initialize the tracing subscriber.
///
/// Level precedence: `--log-level`, then the document's `log.level`, then
/// `RUST_LOG`, then `info`.
fn init_logging(cli_level: Option<&str>, log: &LogConfig) -> Result<()> {
    let filter = match cli_level.or(log.level.as_deref()) {
        Some(level) => EnvFilter::try_new(level)
            .map_err(|e| anyhow::anyhow!("invalid log level '{}': {}", level, e))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    match log.format {
        LogFormat::Console => tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
    }

    Ok(())
}
