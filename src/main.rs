use anyhow::Context;
use clap::Parser;
use rump::config::{ENV_AUTH_FROM, ENV_AUTH_TO};
use rump::migrate::TerminalProgress;
use rump::{migrate, Connection, ConnectionConfig, MigrationConfig};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// Copy every key of a Redis-compatible store into another (SCAN/DUMP/RESTORE).
///
/// Passwords are read from RUMP_AUTH_FROM and RUMP_AUTH_TO when set.
/// Expiration times are not copied.
#[derive(Parser, Debug)]
#[command(name = "rump")]
#[command(author, version, about)]
struct Args {
    /// Source store, e.g. redis://127.0.0.1:6379/0
    #[arg(long)]
    from: String,

    /// Destination store, e.g. redis://127.0.0.1:6379/1
    #[arg(long)]
    to: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr, stdout carries the progress markers
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Missing flags: clap prints usage and exits with a failure code
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let source_config = ConnectionConfig::from_url_and_env(&args.from, ENV_AUTH_FROM)
        .context("invalid --from")?;
    let destination_config = ConnectionConfig::from_url_and_env(&args.to, ENV_AUTH_TO)
        .context("invalid --to")?;

    let source = Connection::connect(&source_config)
        .await
        .with_context(|| format!("cannot connect to {}", source_config))?;
    let destination = Connection::connect(&destination_config)
        .await
        .with_context(|| format!("cannot connect to {}", destination_config))?;

    let report = migrate(
        source,
        destination,
        &MigrationConfig::default(),
        Arc::new(TerminalProgress),
    )
    .await?;

    info!("Report: {}", serde_json::to_string(&report)?);
    Ok(())
}
