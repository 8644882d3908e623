//! failoverctl
//!
//! Operator CLI for recovery plans and failover executions.
//!
//! Usage:
//!   failoverctl <subcommand> [options]
//!
//! Available subcommands:
//!   validate  - Check a plan document against quotas and inventory
//!   drill     - Run a plan end-to-end against the simulated service
//!   status    - Show one execution from a file store
//!   list      - List executions in a file store
//!   capacity  - Capacity across the configured accounts

mod cli;
mod commands;
mod render;

use anyhow::{Context, Result};
use clap::Parser;
use stratoswarm_failover_orchestrator::OrchestratorConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Commands};
use commands::CommandContext;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match cli.config.as_deref() {
        Some(path) => OrchestratorConfig::load_from(path)
            .with_context(|| format!("loading configuration from {path}"))?,
        None => OrchestratorConfig::from_env().context("reading configuration from environment")?,
    };

    let ctx = CommandContext {
        config,
        format: cli.format,
    };

    match cli.command {
        Commands::Validate(args) => args.execute(&ctx).await,
        Commands::Drill(args) => args.execute(&ctx).await,
        Commands::Status(args) => args.execute(&ctx).await,
        Commands::List(args) => args.execute(&ctx).await,
        Commands::Capacity(args) => args.execute(&ctx).await,
    }
}
