//! winnetguard: per-application outbound firewall.
//!
//! Entry point: parses the command line, installs diagnostic logging, loads the
//! layered configuration, and hands the command to the handler.
//!
//! # I/O
//!
//! - **Audit trail**: JSON events to syslog, never to the terminal
//! - **Diagnostics**: `tracing` to stderr, filtered by `-v` or `RUST_LOG`
//! - **Console**: engine events to stdout, commands from stdin (`run` only)

use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use winnetguard::{cli::Cli, cli_handler, config::ConfigLoader, context::AppContext};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::new()
        .load(&cli)
        .context("Failed to load configuration")?;

    init_tracing(cli.verbose, config.general.log_level.as_deref())?;
    debug!("Parsed CLI arguments: {:?}", cli);
    debug!("Loaded configuration: {:?}", config);

    let ctx = AppContext::with_syslog(config);
    cli_handler::handle_command(&ctx, cli.command).await
}

/// Initialize the tracing subscriber for diagnostic logging.
///
/// This is separate from the audit trail which goes to syslog.
///
/// # Verbosity Levels
/// - 0 (default): `RUST_LOG`, else the configured `log_level`, else warnings
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8, configured: Option<&str>) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(configured.unwrap_or("warn"))),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}
