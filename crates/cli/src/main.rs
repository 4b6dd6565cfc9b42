//! `callctx` operator CLI.
//!
//! Runs the same services as the server against the configured database,
//! for inspecting and repairing caller context outside a call. Results print
//! as JSON on stdout; logs go to stderr.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use callctx_client::Services;
use callctx_core::AppConfig;

mod commands;

use commands::Command;

#[derive(Debug, Parser)]
#[command(name = "callctx")]
#[command(about = "Inspect and manage cached caller context", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load().context("loading configuration")?;
    let services = Services::from_config(config).await.context("starting services")?;

    let output = cli.command.execute(&services).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    services.db.close().await.context("closing database")?;
    Ok(())
}
